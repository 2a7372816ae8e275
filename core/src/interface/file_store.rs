use super::KeyValueStore;
use crate::prelude::{SafetyError, SafetyResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key-value store persisted as a single JSON object on disk.
///
/// Every write rewrites the whole file; the store is meant for a handful of
/// small device-local flags.
pub struct JsonFileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> SafetyResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| SafetyError::Storage(format!("reading {}: {e}", self.path.display())))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| SafetyError::Storage(format!("parsing {}: {e}", self.path.display())))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> SafetyResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SafetyError::Storage(e.to_string()))?;
            }
        }
        let body = serde_json::to_string_pretty(entries)
            .map_err(|e| SafetyError::Storage(e.to_string()))?;
        fs::write(&self.path, body)
            .map_err(|e| SafetyError::Storage(format!("writing {}: {e}", self.path.display())))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> SafetyResult<Option<String>> {
        let _guard = self.guard.lock().map_err(|e| SafetyError::Storage(e.to_string()))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> SafetyResult<()> {
        let _guard = self.guard.lock().map_err(|e| SafetyError::Storage(e.to_string()))?;
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> SafetyResult<()> {
        let _guard = self.guard.lock().map_err(|e| SafetyError::Storage(e.to_string()))?;
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn values_survive_a_new_store_instance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        JsonFileStore::new(&path).set("flag", "on").unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("flag").unwrap().as_deref(), Some("on"));
        reopened.remove("flag").unwrap();
        assert_eq!(reopened.get("flag").unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.get("flag"), Err(SafetyError::Storage(_))));
    }
}
