//! In-memory key-value store mutated only by the `set_memory` tool.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Lives for the console process only; cleared on disconnect.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_clear() {
        let store = MemoryStore::new();
        store.set("favorite_color", "teal");
        assert_eq!(store.get("favorite_color").as_deref(), Some("teal"));

        store.set("favorite_color", "mauve");
        assert_eq!(store.get("favorite_color").as_deref(), Some("mauve"));

        store.clear();
        assert!(store.get("favorite_color").is_none());
        assert!(store.snapshot().is_empty());
    }
}
