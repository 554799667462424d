use std::collections::BTreeMap;

use serde_json::Value;

/// Named metadata records attached to a world by other subsystems,
/// keyed by `(softwareTag, name)`. Records the running server has no
/// handler for are kept verbatim so a load-save cycle never drops them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBag {
    entries: BTreeMap<(String, String), Value>,
}

impl MetadataBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        software: impl Into<String>,
        name: impl Into<String>,
        value: Value,
    ) -> Option<Value> {
        self.entries.insert((software.into(), name.into()), value)
    }

    pub fn get(&self, software: &str, name: &str) -> Option<&Value> {
        self.entries
            .get(&(software.to_string(), name.to_string()))
    }

    pub fn remove(&mut self, software: &str, name: &str) -> Option<Value> {
        self.entries
            .remove(&(software.to_string(), name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.entries
            .iter()
            .map(|((software, name), value)| (software.as_str(), name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_get() {
        let mut bag = MetadataBag::new();
        bag.insert("chisel", "clickDistance", json!({"version": 1, "distance": 160}));
        assert_eq!(
            bag.get("chisel", "clickDistance").unwrap()["distance"],
            json!(160)
        );
        assert!(bag.get("chisel", "weather").is_none());
    }

    #[test]
    fn test_keys_are_unique() {
        let mut bag = MetadataBag::new();
        bag.insert("chisel", "weather", json!({"type": 0}));
        let previous = bag.insert("chisel", "weather", json!({"type": 1}));
        assert_eq!(previous, Some(json!({"type": 0})));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_unknown_records_survive_copies() {
        let mut bag = MetadataBag::new();
        let alien = json!({"anything": ["the", "server", "ignores"]});
        bag.insert("other-software", "mystery", alien.clone());
        let copied = bag.clone();
        assert_eq!(copied.get("other-software", "mystery"), Some(&alien));
    }
}
