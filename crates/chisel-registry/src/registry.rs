use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{category} '{name}' has already been registered")]
    Duplicate { category: &'static str, name: String },
    #[error("{category} '{name}' is not registered")]
    NotFound { category: &'static str, name: String },
    #[error("module '{name}' is missing dependency '{dependency}'")]
    MissingDependency { name: String, dependency: String },
    #[error("module '{name}' requires '{dependency}' version {required}, found {found}")]
    VersionMismatch {
        name: String,
        dependency: String,
        required: String,
        found: String,
    },
    #[error("dependency cycle involving module '{0}'")]
    DependencyCycle(String),
}

/// One name-unique registration table. Every extension category (blocks,
/// commands, packets, map generators, world formats) gets its own
/// `Registry`, populated during the deterministic startup phase.
pub struct Registry<T> {
    category: &'static str,
    entries: HashMap<String, T>,
    // Registration order, so iteration is deterministic.
    order: Vec<String>,
}

impl<T> Registry<T> {
    pub fn new(category: &'static str) -> Self {
        Self {
            category,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register an entry. Duplicates fail unless `overwrite` is set, in
    /// which case the existing entry is replaced in place (keeping its
    /// original position in iteration order).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        value: T,
        overwrite: bool,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            if !overwrite {
                return Err(RegistryError::Duplicate {
                    category: self.category,
                    name,
                });
            }
            debug!(category = self.category, name = %name, "overriding registration");
        } else {
            if overwrite {
                warn!(
                    category = self.category,
                    name = %name,
                    "override flag set but nothing to override"
                );
            }
            self.order.push(name.clone());
        }
        self.entries.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&T, RegistryError> {
        self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            category: self.category,
            name: name.to_string(),
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|v| (name.as_str(), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new("test");
        registry.register("alpha", 1, false).unwrap();
        registry.register("beta", 2, false).unwrap();
        assert_eq!(registry.get("alpha"), Some(&1));
        assert!(registry.has("beta"));
        assert!(!registry.has("gamma"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_fails_without_override() {
        let mut registry = Registry::new("test");
        registry.register("alpha", 1, false).unwrap();
        let err = registry.register("alpha", 2, false).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
        assert_eq!(registry.get("alpha"), Some(&1));
    }

    #[test]
    fn test_override_replaces_in_place() {
        let mut registry = Registry::new("test");
        registry.register("alpha", 1, false).unwrap();
        registry.register("beta", 2, false).unwrap();
        registry.register("alpha", 10, true).unwrap();
        let names: Vec<_> = registry.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(registry.get("alpha"), Some(&10));
    }

    #[test]
    fn test_iter_keeps_registration_order() {
        let mut registry = Registry::new("test");
        for name in ["c", "a", "b"] {
            registry.register(name, (), false).unwrap();
        }
        let names: Vec<_> = registry.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
