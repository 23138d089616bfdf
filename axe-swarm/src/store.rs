//! Durable key-value storage for swarm state.
//!
//! Values are JSON. The registry, the refresh interval, the sort order and
//! the view preference each live under their own key so that one can be
//! rewritten without touching the others.

use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::tracing::prelude::*;

pub const SWARM_DATA: &str = "swarm_data";
pub const SWARM_REFRESH_TIME: &str = "swarm_refresh_time";
pub const SWARM_SORTING: &str = "swarm_sorting";
pub const SWARM_VIEW: &str = "swarm_view";

pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// Replace the value under `key` and make it durable before returning.
    fn put(&self, key: &str, value: Value) -> Result<()>;
}

/// Typed read. A value that no longer deserializes is logged and treated
/// as absent.
pub fn load<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, error = %e, "Ignoring unreadable stored value");
            None
        }
    }
}

pub fn save<T: Serialize + ?Sized>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    store.put(key, serde_json::to_value(value)?)
}

/// All keys in one JSON object on disk.
///
/// The file is read once at open; every `put` rewrites it through a
/// temporary file and a rename so a crash never leaves it half-written.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "State file is corrupt, starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No state file yet");
                Map::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &Map<String, Value>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "axe-swarm-{}-{}.json",
            std::process::id(),
            name
        ))
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = std::fs::remove_file(&path);

        let store = JsonFileStore::open(&path).unwrap();
        save(&store, SWARM_REFRESH_TIME, &45_u32).unwrap();
        save(&store, SWARM_VIEW, "list").unwrap();
        drop(store);

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(load::<u32>(&store, SWARM_REFRESH_TIME), Some(45));
        assert_eq!(load::<String>(&store, SWARM_VIEW).as_deref(), Some("list"));
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.get(SWARM_DATA).is_none());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn mistyped_value_loads_as_absent() {
        let store = MemoryStore::new();
        store.put(SWARM_REFRESH_TIME, json!("soon")).unwrap();
        assert_eq!(load::<u32>(&store, SWARM_REFRESH_TIME), None);
    }
}
