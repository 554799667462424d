use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::registry::RegistryError;

/// A dependency on another module, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub version: Option<String>,
}

impl Dependency {
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn exact(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }
}

/// Static description of one module: what it is called and what it needs.
/// Hard dependencies must be present with a matching version; soft
/// dependencies only influence initialization order when present.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<Dependency>,
    pub soft_dependencies: Vec<Dependency>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            soft_dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn soft_depends_on(mut self, dep: Dependency) -> Self {
        self.soft_dependencies.push(dep);
        self
    }
}

/// The set of modules known at startup. `resolve_order` validates the
/// graph and produces the deterministic initialization order.
#[derive(Default)]
pub struct ModuleGraph {
    modules: Vec<ModuleDescriptor>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, descriptor: ModuleDescriptor) -> Result<(), RegistryError> {
        if self.modules.iter().any(|m| m.name == descriptor.name) {
            return Err(RegistryError::Duplicate {
                category: "module",
                name: descriptor.name,
            });
        }
        debug!(module = %descriptor.name, version = %descriptor.version, "module added");
        self.modules.push(descriptor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Remove a blacklisted module plus everything that hard-depends on
    /// it, transitively. Returns the names that were dropped.
    pub fn blacklist(&mut self, name: &str) -> Vec<String> {
        let mut dropped = Vec::new();
        let mut pending = vec![name.to_string()];
        while let Some(target) = pending.pop() {
            let Some(idx) = self.modules.iter().position(|m| m.name == target) else {
                continue;
            };
            self.modules.remove(idx);
            dropped.push(target.clone());
            for module in &self.modules {
                if module.dependencies.iter().any(|d| d.name == target) {
                    pending.push(module.name.clone());
                }
            }
        }
        if !dropped.is_empty() {
            info!(?dropped, "modules skipped by blacklist");
        }
        dropped
    }

    /// Topologically sort modules over hard dependencies (soft
    /// dependencies order modules only when both sides are present).
    /// Fails on missing hard deps, version mismatches, and cycles.
    pub fn resolve_order(&self) -> Result<Vec<&ModuleDescriptor>, RegistryError> {
        let by_name: HashMap<&str, &ModuleDescriptor> =
            self.modules.iter().map(|m| (m.name.as_str(), m)).collect();

        // Validate hard dependencies up front.
        for module in &self.modules {
            for dep in &module.dependencies {
                let Some(found) = by_name.get(dep.name.as_str()) else {
                    return Err(RegistryError::MissingDependency {
                        name: module.name.clone(),
                        dependency: dep.name.clone(),
                    });
                };
                if let Some(required) = &dep.version {
                    if *required != found.version {
                        return Err(RegistryError::VersionMismatch {
                            name: module.name.clone(),
                            dependency: dep.name.clone(),
                            required: required.clone(),
                            found: found.version.clone(),
                        });
                    }
                }
            }
        }

        // Depth-first post-order walk; `visiting` detects cycles.
        let mut order = Vec::with_capacity(self.modules.len());
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        for module in &self.modules {
            self.visit(module, &by_name, &mut visited, &mut visiting, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        module: &'a ModuleDescriptor,
        by_name: &HashMap<&str, &'a ModuleDescriptor>,
        visited: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
        order: &mut Vec<&'a ModuleDescriptor>,
    ) -> Result<(), RegistryError> {
        if visited.contains(module.name.as_str()) {
            return Ok(());
        }
        if !visiting.insert(module.name.as_str()) {
            return Err(RegistryError::DependencyCycle(module.name.clone()));
        }
        for dep in module
            .dependencies
            .iter()
            .chain(module.soft_dependencies.iter())
        {
            if let Some(found) = by_name.get(dep.name.as_str()) {
                self.visit(found, by_name, visited, visiting, order)?;
            }
            // A missing soft dependency is fine; hard deps were already
            // validated above.
        }
        visiting.remove(module.name.as_str());
        visited.insert(module.name.as_str());
        order.push(module);
        Ok(())
    }
}
