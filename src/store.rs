//! Key-value persistence for the transcript and credential.
//!
//! The session treats the store as a last-write-wins map from string keys to
//! JSON values. [`MemoryStore`] keeps values in process; [`FileStore`] keeps one
//! compact JSON file per key in a directory.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, from_reader, to_writer};

use crate::error::{Error, Result};

/// A string-keyed store of JSON values.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` when absent.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes `key`; removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Reads `key` as a `T`, falling back to `T::default()` when absent.
pub fn load_or_default<T>(store: &dyn KeyValueStore, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match store.get(key)? {
        Some(value) => serde_json::from_value(value).map_err(|err| {
            Error::serialization(
                format!("failed to parse stored value for {key}"),
                Some(Box::new(err)),
            )
        }),
        None => Ok(T::default()),
    }
}

/// Serializes `value` and stores it under `key`.
pub fn save<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store.set(key, value)
}

/// In-process store; contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Directory-backed store holding `<key>.json` per key.
///
/// Writes go to a temporary file that is renamed over the target, so a reader
/// never observes a half-written value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| Error::io(format!("failed to create {}", dir.display()), err))?;
        Ok(Self { dir })
    }

    /// The directory holding the values.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::store("key is not a valid file name", key));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::io(
                    format!("failed to open {}", path.display()),
                    err,
                ));
            }
        };
        let value = from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization(
                format!("failed to parse {}", path.display()),
                Some(Box::new(err)),
            )
        })?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let result = write_json(&tmp, key, &value).and_then(|()| {
            fs::rename(&tmp, &path)
                .map_err(|err| Error::io(format!("failed to replace {}", path.display()), err))
        });
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(
                format!("failed to remove {}", path.display()),
                err,
            )),
        }
    }
}

/// Writes `value` as compact JSON to `path`.
///
/// The session saves after every streamed increment, so values are kept compact.
fn write_json(path: &Path, key: &str, value: &Value) -> Result<()> {
    let file = File::create(path)
        .map_err(|err| Error::io(format!("failed to create {}", path.display()), err))?;
    let mut writer = BufWriter::new(file);
    to_writer(&mut writer, value).map_err(|err| {
        Error::serialization(
            format!("failed to serialize value for {key}"),
            Some(Box::new(err)),
        )
    })?;
    writer
        .flush()
        .map_err(|err| Error::io(format!("failed to write {}", path.display()), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("chat-messages").unwrap(), None);

        store.set("chat-messages", json!([1, 2])).unwrap();
        assert_eq!(store.get("chat-messages").unwrap(), Some(json!([1, 2])));

        store.set("chat-messages", json!([])).unwrap();
        assert_eq!(store.get("chat-messages").unwrap(), Some(json!([])));

        store.remove("chat-messages").unwrap();
        store.remove("chat-messages").unwrap();
        assert_eq!(store.get("chat-messages").unwrap(), None);
    }

    #[test]
    fn load_or_default_when_absent() {
        let store = MemoryStore::new();
        let key: String = load_or_default(&store, "groq-api-key").unwrap();
        assert_eq!(key, "");
        let messages: Vec<String> = load_or_default(&store, "chat-messages").unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn load_or_default_rejects_wrong_shape() {
        let store = MemoryStore::new();
        store.set("chat-messages", json!({"not": "a list"})).unwrap();
        let err = load_or_default::<Vec<String>>(&store, "chat-messages").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data")).unwrap();
        save(&store, "groq-api-key", "sk-test").unwrap();
        assert!(dir.path().join("data").join("groq-api-key.json").exists());

        let reopened = FileStore::new(dir.path().join("data")).unwrap();
        let key: String = load_or_default(&reopened, "groq-api-key").unwrap();
        assert_eq!(key, "sk-test");

        reopened.remove("groq-api-key").unwrap();
        assert_eq!(store.get("groq-api-key").unwrap(), None);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.set("../escape", json!(1)).is_err());
        assert!(store.get("a/b").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("chat-messages.json"), "{ not json").unwrap();
        let err = store.get("chat-messages").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn file_store_writes_compact_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store
            .set("chat-messages", json!([{"id": "user-1", "content": "Hi"}]))
            .unwrap();
        let written = fs::read_to_string(dir.path().join("chat-messages.json")).unwrap();
        assert_eq!(written, r#"[{"id":"user-1","content":"Hi"}]"#);
    }

    #[test]
    fn failed_set_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        // A directory in the target's place makes the final rename fail.
        fs::create_dir(dir.path().join("chat-messages.json")).unwrap();
        fs::write(dir.path().join("chat-messages.json").join("keep"), "x").unwrap();

        assert!(store.set("chat-messages", json!([])).is_err());
        assert!(!dir.path().join("chat-messages.json.tmp").exists());
    }
}
