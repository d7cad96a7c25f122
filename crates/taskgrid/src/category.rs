use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::common::Map;
use crate::common::error::invalid_spec;
use crate::resources::{PartialResources, ResourceKind};

#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationMode {
    /// The envelope (or its absence) fixes the allocation.
    #[default]
    Fixed,
    /// Start from a first guess and refine from observed usage.
    #[serde(alias = "min_waste")]
    MinWaste,
}

impl FromStr for AllocationMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(AllocationMode::Fixed),
            "min-waste" | "min_waste" => Ok(AllocationMode::MinWaste),
            other => invalid_spec(format!("unknown allocation mode `{other}`")),
        }
    }
}

impl std::fmt::Display for AllocationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AllocationMode::Fixed => "fixed",
            AllocationMode::MinWaste => "min-waste",
        })
    }
}

/// Resource allocation policy shared by all tasks of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    #[serde(default)]
    pub mode: AllocationMode,
    #[serde(default)]
    pub max: PartialResources,
    #[serde(default)]
    pub min: PartialResources,
    #[serde(default)]
    pub first_guess: Option<PartialResources>,
}

impl CategorySpec {
    /// Spec used for categories that were never configured.
    pub fn default_for(name: &str) -> Self {
        CategorySpec {
            name: name.to_string(),
            mode: AllocationMode::Fixed,
            max: PartialResources::default(),
            min: PartialResources::default(),
            first_guess: None,
        }
    }

    pub fn with_mode(mut self, mode: AllocationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max(mut self, max: PartialResources) -> Self {
        self.max = max;
        self
    }

    pub fn with_min(mut self, min: PartialResources) -> Self {
        self.min = min;
        self
    }

    pub fn with_first_guess(mut self, guess: PartialResources) -> Self {
        self.first_guess = Some(guess);
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.max.validate(&format!("category `{}` max", self.name))?;
        self.min.validate(&format!("category `{}` min", self.name))?;
        if let Some(guess) = &self.first_guess {
            guess.validate(&format!("category `{}` first guess", self.name))?;
        }
        for kind in ResourceKind::ALL {
            let (Some(max), Some(min)) = (self.max.get(kind), self.min.get(kind)) else {
                continue;
            };
            if max != 0 && min > max {
                return invalid_spec(format!(
                    "category `{}` min {kind} ({min}) exceeds max {kind} ({max})",
                    self.name
                ));
            }
        }
        Ok(())
    }
}

/// Category name -> allocation policy, owned by one workflow run.
#[derive(Default, Debug)]
pub struct CategoryRegistry {
    categories: RwLock<Map<String, CategorySpec>>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the spec stored under `spec.name`.
    pub fn set_category(&self, spec: CategorySpec) -> crate::Result<()> {
        spec.validate()?;
        log::debug!(
            "Category `{}` set: mode={} max={} min={} guess={:?}",
            spec.name,
            spec.mode,
            spec.max,
            spec.min,
            spec.first_guess.map(|g| g.to_string())
        );
        self.categories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get_category(&self, name: &str) -> CategorySpec {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_else(|| CategorySpec::default_for(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn category_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    pub fn set_mode(&self, name: &str, mode: AllocationMode) -> crate::Result<()> {
        self.update(name, |spec| spec.mode = mode)
    }

    pub fn set_max_resources(&self, name: &str, max: PartialResources) -> crate::Result<()> {
        self.update(name, |spec| spec.max = max)
    }

    pub fn set_min_resources(&self, name: &str, min: PartialResources) -> crate::Result<()> {
        self.update(name, |spec| spec.min = min)
    }

    pub fn set_first_allocation_guess(
        &self,
        name: &str,
        guess: PartialResources,
    ) -> crate::Result<()> {
        self.update(name, |spec| spec.first_guess = Some(guess))
    }

    fn update<F: FnOnce(&mut CategorySpec)>(&self, name: &str, f: F) -> crate::Result<()> {
        let mut spec = self.get_category(name);
        f(&mut spec);
        self.set_category(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_is_default() {
        let registry = CategoryRegistry::new();
        let spec = registry.get_category("never-set");
        assert_eq!(spec, CategorySpec::default_for("never-set"));
        assert_eq!(spec.mode, AllocationMode::Fixed);
        assert!(!spec.max.has_any());
        assert!(spec.first_guess.is_none());
        assert!(!registry.contains("never-set"));
    }

    #[test]
    fn test_upsert_category() {
        let registry = CategoryRegistry::new();
        registry
            .set_category(
                CategorySpec::default_for("a").with_max(PartialResources::new().cores(2)),
            )
            .unwrap();
        registry
            .set_category(
                CategorySpec::default_for("a").with_max(PartialResources::new().cores(4)),
            )
            .unwrap();
        assert_eq!(registry.get_category("a").max.cores, Some(4));
        assert_eq!(registry.category_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_incremental_setters() {
        let registry = CategoryRegistry::new();
        registry
            .set_max_resources("c", PartialResources::new().memory(100))
            .unwrap();
        registry
            .set_min_resources("c", PartialResources::new().cores(3))
            .unwrap();
        registry.set_mode("c", AllocationMode::MinWaste).unwrap();
        registry
            .set_first_allocation_guess("c", PartialResources::new().cores(1))
            .unwrap();
        let spec = registry.get_category("c");
        assert_eq!(spec.mode, AllocationMode::MinWaste);
        assert_eq!(spec.max, PartialResources::new().memory(100));
        assert_eq!(spec.min, PartialResources::new().cores(3));
        assert_eq!(spec.first_guess, Some(PartialResources::new().cores(1)));
    }

    #[test]
    fn test_reject_invalid_spec() {
        let registry = CategoryRegistry::new();
        assert!(
            registry
                .set_category(
                    CategorySpec::default_for("neg").with_min(PartialResources::new().memory(-1))
                )
                .is_err()
        );
        assert!(
            registry
                .set_category(
                    CategorySpec::default_for("inv")
                        .with_max(PartialResources::new().cores(2))
                        .with_min(PartialResources::new().cores(3))
                )
                .is_err()
        );
        assert!(!registry.contains("neg"));
        assert!(!registry.contains("inv"));
    }

    #[test]
    fn test_min_above_zero_max_is_allowed() {
        let spec = CategorySpec::default_for("z")
            .with_max(PartialResources::new().cores(0).memory(10))
            .with_min(PartialResources::new().cores(3));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(
            "FIXED".parse::<AllocationMode>().unwrap(),
            AllocationMode::Fixed
        );
        assert_eq!(
            "min_waste".parse::<AllocationMode>().unwrap(),
            AllocationMode::MinWaste
        );
        assert_eq!(
            "min-waste".parse::<AllocationMode>().unwrap(),
            AllocationMode::MinWaste
        );
        assert!("greedy".parse::<AllocationMode>().is_err());
    }
}
