use derive_more::{Add, AddAssign, Sub, SubAssign, Sum};
use serde::{Deserialize, Serialize};

use crate::resources::{ResourceAmount, ResourceKind};

/// Concrete amount of every resource dimension.
#[derive(
    Debug,
    Default,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Hash,
    Eq,
    PartialEq,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    Sum,
)]
pub struct ResourceVector {
    pub cores: ResourceAmount,
    pub memory: ResourceAmount,
    pub disk: ResourceAmount,
    pub gpus: ResourceAmount,
}

impl ResourceVector {
    pub const ZERO: ResourceVector = ResourceVector::new(0, 0, 0, 0);

    pub const fn new(
        cores: ResourceAmount,
        memory: ResourceAmount,
        disk: ResourceAmount,
        gpus: ResourceAmount,
    ) -> Self {
        ResourceVector {
            cores,
            memory,
            disk,
            gpus,
        }
    }

    pub fn get(&self, kind: ResourceKind) -> ResourceAmount {
        match kind {
            ResourceKind::Cores => self.cores,
            ResourceKind::Memory => self.memory,
            ResourceKind::Disk => self.disk,
            ResourceKind::Gpus => self.gpus,
        }
    }

    pub fn set(&mut self, kind: ResourceKind, amount: ResourceAmount) {
        match kind {
            ResourceKind::Cores => self.cores = amount,
            ResourceKind::Memory => self.memory = amount,
            ResourceKind::Disk => self.disk = amount,
            ResourceKind::Gpus => self.gpus = amount,
        }
    }

    /// Same vector with accelerators removed.
    pub fn without_gpus(mut self) -> Self {
        self.gpus = 0;
        self
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Returns true if `self` can be carved out of `capacity`.
    pub fn fits(&self, capacity: &ResourceVector) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&kind| self.get(kind) <= capacity.get(kind))
    }

    pub fn max_by_dim(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cores: self.cores.max(other.cores),
            memory: self.memory.max(other.memory),
            disk: self.disk.max(other.disk),
            gpus: self.gpus.max(other.gpus),
        }
    }

    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cores: self.cores.saturating_sub(other.cores),
            memory: self.memory.saturating_sub(other.memory),
            disk: self.disk.saturating_sub(other.disk),
            gpus: self.gpus.saturating_sub(other.gpus),
        }
    }

    /// Ordering key used to pick the "largest" of several workers.
    pub fn size_key(&self) -> (ResourceAmount, ResourceAmount, ResourceAmount, ResourceAmount) {
        (self.cores, self.memory, self.disk, self.gpus)
    }
}

impl std::fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cores={} memory={}MB disk={}MB gpus={}",
            self.cores, self.memory, self.disk, self.gpus
        )
    }
}
