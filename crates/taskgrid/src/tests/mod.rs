mod test_allocation;
pub mod utils;
