//! File-backed credential cache, so the API key survives console restarts.
//!
//! The cache only ever holds the key the user typed at the prompt; a key from
//! the environment is never written to disk. `clear` backs the explicit
//! reset flow.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct CachedCredential {
    api_key: String,
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The cached key, if a readable cache file exists. A corrupt cache is
    /// treated as absent rather than an error.
    pub fn load(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<CachedCredential>(&raw) {
            Ok(cached) if !cached.api_key.is_empty() => Some(cached.api_key),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "ignoring corrupt credential cache");
                None
            }
        }
    }

    pub fn store(&self, api_key: &str) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(&CachedCredential {
            api_key: api_key.to_string(),
        })?;
        fs::write(&self.path, body)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }

    /// Removes the cache file. Missing file is fine; that's the target state.
    pub fn clear(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_load_clear_round_trip() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nested/credential.json"));

        assert!(store.load().is_none());

        store.store("sk-cached").unwrap();
        assert_eq!(store.load().as_deref(), Some("sk-cached"));

        store.clear().unwrap();
        assert!(store.load().is_none());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_cache_reads_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credential.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = CredentialStore::new(&path);
        assert!(store.load().is_none());
    }

    #[test]
    fn empty_key_reads_as_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credential.json");
        std::fs::write(&path, r#"{"api_key":""}"#).unwrap();

        let store = CredentialStore::new(&path);
        assert!(store.load().is_none());
    }
}
