use serde::{Deserialize, Serialize};

use crate::common::error::invalid_spec;
use crate::resources::{ResourceAmount, ResourceKind, ResourceVector};

/// Resource vector in which every dimension may be left unset.
///
/// Values are signed so that a negative amount coming from a configuration
/// surface is representable and can be rejected by [`PartialResources::validate`]
/// instead of wrapping around.
#[derive(Debug, Default, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<i64>,
}

impl PartialResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cores(mut self, value: i64) -> Self {
        self.cores = Some(value);
        self
    }

    pub fn memory(mut self, value: i64) -> Self {
        self.memory = Some(value);
        self
    }

    pub fn disk(mut self, value: i64) -> Self {
        self.disk = Some(value);
        self
    }

    pub fn gpus(mut self, value: i64) -> Self {
        self.gpus = Some(value);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<i64> {
        match kind {
            ResourceKind::Cores => self.cores,
            ResourceKind::Memory => self.memory,
            ResourceKind::Disk => self.disk,
            ResourceKind::Gpus => self.gpus,
        }
    }

    pub fn set(&mut self, kind: ResourceKind, value: Option<i64>) {
        match kind {
            ResourceKind::Cores => self.cores = value,
            ResourceKind::Memory => self.memory = value,
            ResourceKind::Disk => self.disk = value,
            ResourceKind::Gpus => self.gpus = value,
        }
    }

    /// Explicitly set amount of a dimension, negative values clamp to zero.
    /// Only meaningful after [`PartialResources::validate`] succeeded.
    pub fn amount(&self, kind: ResourceKind) -> Option<ResourceAmount> {
        self.get(kind).map(|v| v.max(0) as ResourceAmount)
    }

    pub fn has_any(&self) -> bool {
        ResourceKind::ALL.iter().any(|&kind| self.get(kind).is_some())
    }

    /// No field set, or every set field is zero.
    pub fn is_empty_envelope(&self) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&kind| self.get(kind).is_none_or(|v| v == 0))
    }

    /// Fields set in `other` take precedence over fields of `self`.
    pub fn overlay(&self, other: &PartialResources) -> PartialResources {
        PartialResources {
            cores: other.cores.or(self.cores),
            memory: other.memory.or(self.memory),
            disk: other.disk.or(self.disk),
            gpus: other.gpus.or(self.gpus),
        }
    }

    /// Unset dimensions become zero.
    pub fn to_vector(&self) -> ResourceVector {
        let mut vector = ResourceVector::ZERO;
        for kind in ResourceKind::ALL {
            vector.set(kind, self.amount(kind).unwrap_or(0));
        }
        vector
    }

    pub fn validate(&self, label: &str) -> crate::Result<()> {
        for kind in ResourceKind::ALL {
            match self.get(kind) {
                Some(value) if value < 0 => {
                    return invalid_spec(format!("{label} {kind} is negative ({value})"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl From<ResourceVector> for PartialResources {
    fn from(vector: ResourceVector) -> Self {
        let mut partial = PartialResources::default();
        for kind in ResourceKind::ALL {
            partial.set(kind, Some(vector.get(kind) as i64));
        }
        partial
    }
}

impl std::fmt::Display for PartialResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_any() {
            return f.write_str("{}");
        }
        let mut first = true;
        for kind in ResourceKind::ALL {
            if let Some(value) = self.get(kind) {
                if !first {
                    f.write_str(" ")?;
                }
                first = false;
                write!(f, "{kind}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_envelope() {
        assert!(PartialResources::new().is_empty_envelope());
        assert!(
            PartialResources::new()
                .cores(0)
                .memory(0)
                .disk(0)
                .gpus(0)
                .is_empty_envelope()
        );
        assert!(PartialResources::new().gpus(0).is_empty_envelope());
        assert!(!PartialResources::new().cores(0).memory(3).is_empty_envelope());
        assert!(!PartialResources::new().gpus(1).is_empty_envelope());
    }

    #[test]
    fn test_overlay() {
        let base = PartialResources::new().cores(2).memory(100);
        let hint = PartialResources::new().memory(50).disk(10);
        assert_eq!(
            base.overlay(&hint),
            PartialResources::new().cores(2).memory(50).disk(10)
        );
    }

    #[test]
    fn test_validate_negative() {
        assert!(PartialResources::new().cores(1).validate("max").is_ok());
        let err = PartialResources::new()
            .disk(-4)
            .validate("max")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid category specification: max disk is negative (-4)"
        );
    }

    #[test]
    fn test_parse_from_toml_like_json() {
        let partial: PartialResources = serde_json::from_str(r#"{"memory": 2}"#).unwrap();
        assert_eq!(partial, PartialResources::new().memory(2));
        assert_eq!(partial.to_vector(), ResourceVector::new(0, 2, 0, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(PartialResources::new().to_string(), "{}");
        assert_eq!(
            PartialResources::new().cores(1).gpus(2).to_string(),
            "cores=1 gpus=2"
        );
    }
}
