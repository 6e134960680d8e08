//! Постоянное хранилище ключ-значение, за которым живёт сессия.
//!
//! Браузерный `localStorage` здесь заменён трейтом [`KeyValueStore`]:
//! - [`MemoryStore`]: в памяти процесса (тесты, одноразовые клиенты);
//! - [`FileStore`]: JSON-файл на диске (CLI).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::{ClientError, ClientResult};

/// Хранилище строковых значений по строковым ключам.
pub trait KeyValueStore: Debug + Send + Sync {
    /// Возвращает значение по ключу или `None`, если ключа нет.
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    /// Сохраняет значение, перезаписывая прежнее.
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    /// Удаляет ключ. Отсутствие ключа ошибкой не считается.
    fn remove(&self, key: &str) -> ClientResult<()>;
}

#[derive(Debug, Default)]
/// Хранилище в памяти процесса.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Создаёт пустое хранилище.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> ClientResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| ClientError::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

#[derive(Debug)]
/// Хранилище в одном JSON-файле вида `{ "key": "value", ... }`.
///
/// Запись идёт через временный файл и `rename`, чтобы оборванная запись
/// не оставила файл наполовину.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Создаёт хранилище поверх файла `path`. Файл создаётся при первой записи.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Путь к файлу хранилища.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> ClientResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let raw = fs::read_to_string(&self.path).map_err(|err| {
            ClientError::Storage(format!("failed to read {}: {err}", self.path.display()))
        })?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw).map_err(|err| {
            ClientError::Storage(format!("malformed store {}: {err}", self.path.display()))
        })
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> ClientResult<()> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|err| ClientError::Storage(format!("failed to serialize store: {err}")))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|err| {
                ClientError::Storage(format!("failed to write {}: {err}", self.path.display()))
            })
    }

    fn modify(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> ClientResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| ClientError::Storage("file store lock poisoned".to_string()))?;

        let mut entries = match self.read_entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "discarding unreadable session store");
                BTreeMap::new()
            }
        };
        apply(&mut entries);
        self.write_entries(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrips_and_removes() {
        let store = MemoryStore::new();
        store.set("user", "{}").expect("set must succeed");
        assert_eq!(store.get("user").expect("get").as_deref(), Some("{}"));

        store.remove("user").expect("remove must succeed");
        assert!(store.get("user").expect("get").is_none());
    }

    #[test]
    fn memory_store_remove_missing_key_is_ok() {
        let store = MemoryStore::new();
        assert!(store.remove("missing").is_ok());
    }

    #[test]
    fn file_store_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path().join("session.json"));
        assert!(store.get("user").expect("get").is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");

        FileStore::new(&path)
            .set("token", "abc")
            .expect("set must succeed");

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("token").expect("get").as_deref(), Some("abc"));
    }

    #[test]
    fn file_store_reports_malformed_file_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        fs::write(&path, "{not-json").expect("write");

        let store = FileStore::new(&path);
        assert!(matches!(store.get("user"), Err(ClientError::Storage(_))));
    }

    #[test]
    fn file_store_overwrites_malformed_file_on_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        fs::write(&path, "{not-json").expect("write");

        let store = FileStore::new(&path);
        store.set("user", "u").expect("set must recover");
        assert_eq!(store.get("user").expect("get").as_deref(), Some("u"));
    }
}
