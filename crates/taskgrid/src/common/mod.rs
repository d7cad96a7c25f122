pub(crate) mod data_structures;
pub(crate) mod error;
pub(crate) mod id_counter;
pub(crate) mod ids;
pub(crate) mod macros;

pub use data_structures::{Map, Set};
pub use id_counter::IdCounter;
