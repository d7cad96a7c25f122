pub mod partial;
pub mod vector;

pub use partial::PartialResources;
pub use vector::ResourceVector;

use serde::{Deserialize, Serialize};

/// Amount of a single resource dimension.
/// Memory and disk are expressed in megabytes.
pub type ResourceAmount = u64;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResourceKind {
    Cores,
    Memory,
    Disk,
    Gpus,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cores,
        ResourceKind::Memory,
        ResourceKind::Disk,
        ResourceKind::Gpus,
    ];

    /// Dimensions that take part in the slot computation.
    pub const SLOTTED: [ResourceKind; 3] =
        [ResourceKind::Cores, ResourceKind::Memory, ResourceKind::Disk];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Cores => "cores",
            ResourceKind::Memory => "memory",
            ResourceKind::Disk => "disk",
            ResourceKind::Gpus => "gpus",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
