use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsStoreError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
    #[error("settings store backend failure: {0}")]
    Backend(String),
    #[error("settings file is malformed: {0}")]
    Serialization(String),
}

/// String key-value persistence used for account bookkeeping.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsStoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsStoreError>;

    /// Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), SettingsStoreError>;
}

impl<S: SettingsStore + ?Sized> SettingsStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsStoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsStoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), SettingsStoreError> {
        (**self).remove(key)
    }
}

#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| SettingsStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SettingsStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SettingsStoreError::Backend("poisoned lock".to_owned()))?;
        data.remove(key);
        Ok(())
    }
}

/// Settings persisted as one flat JSON object on disk.
///
/// Every write rewrites the whole file through a temp file and rename.
#[derive(Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    cache: Arc<RwLock<BTreeMap<String, String>>>,
}

impl JsonFileSettingsStore {
    /// Open (or lazily create) the settings file at `path`.
    ///
    /// Non-string values in an existing file are skipped.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsStoreError> {
        let path = path.into();
        let cache = load_settings_file(&path)?;
        Ok(Self {
            path,
            cache: Arc::new(RwLock::new(cache)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<F>(&self, apply: F) -> Result<(), SettingsStoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| SettingsStoreError::Backend("poisoned lock".to_owned()))?;
        let mut next = cache.clone();
        apply(&mut next);
        save_settings_file(&self.path, &next)?;
        *cache = next;
        Ok(())
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsStoreError> {
        let cache = self
            .cache
            .read()
            .map_err(|_| SettingsStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(cache.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsStoreError> {
        self.mutate(|data| {
            data.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), SettingsStoreError> {
        self.mutate(|data| {
            data.remove(key);
        })
    }
}

fn load_settings_file(path: &Path) -> Result<BTreeMap<String, String>, SettingsStoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => {
            return Err(SettingsStoreError::Unavailable(format!(
                "failed reading settings {}: {err}",
                path.display()
            )));
        }
    };

    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|err| {
        SettingsStoreError::Serialization(format!("{}: {err}", path.display()))
    })?;
    let serde_json::Value::Object(object) = value else {
        return Err(SettingsStoreError::Serialization(format!(
            "{}: expected a JSON object",
            path.display()
        )));
    };

    Ok(object
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(value) => Some((key, value)),
            _ => None,
        })
        .collect())
}

fn save_settings_file(
    path: &Path,
    data: &BTreeMap<String, String>,
) -> Result<(), SettingsStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            SettingsStoreError::Unavailable(format!(
                "failed creating settings directory {}: {err}",
                parent.display()
            ))
        })?;
    }

    let encoded = serde_json::to_vec_pretty(data)
        .map_err(|err| SettingsStoreError::Serialization(err.to_string()))?;
    let temp_path = settings_temp_path(path);
    fs::write(&temp_path, encoded).map_err(|err| {
        SettingsStoreError::Backend(format!(
            "failed writing temp settings {}: {err}",
            temp_path.display()
        ))
    })?;

    if let Err(rename_err) = fs::rename(&temp_path, path) {
        // Windows does not allow replacing existing files via rename.
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(SettingsStoreError::Backend(format!(
                    "failed replacing settings {} after rename error ({rename_err}): {err}",
                    path.display()
                )));
            }
        }
        fs::rename(&temp_path, path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            SettingsStoreError::Backend(format!(
                "failed writing settings {} after temp write: {err}",
                path.display()
            ))
        })?;
    }

    Ok(())
}

fn settings_temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("settings.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn unique_temp_path(label: &str) -> PathBuf {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir()
            .join(format!("chatcore-{label}-{now_nanos}"))
            .join("settings.json")
    }

    #[test]
    fn in_memory_set_get_remove() {
        let store = InMemorySettingsStore::default();
        assert_eq!(store.get("k").expect("get"), None);

        store.set("k", "v").expect("set");
        assert_eq!(store.get("k").expect("get").as_deref(), Some("v"));

        store.remove("k").expect("remove");
        store.remove("k").expect("removing twice is fine");
        assert_eq!(store.get("k").expect("get"), None);
    }

    #[test]
    fn clones_share_the_same_data() {
        let a = InMemorySettingsStore::default();
        let b = a.clone();
        a.set("accountsJson", "[]").expect("set");
        assert_eq!(b.get("accountsJson").expect("get").as_deref(), Some("[]"));
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let path = unique_temp_path("settings");
        let store = JsonFileSettingsStore::open(&path).expect("open missing file");
        store.set("activeAccountId", "local-1").expect("set");
        store.set("accountsJson", "[]").expect("set");
        store.remove("accountsJson").expect("remove");

        let reopened = JsonFileSettingsStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.get("activeAccountId").expect("get").as_deref(),
            Some("local-1")
        );
        assert_eq!(reopened.get("accountsJson").expect("get"), None);

        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn file_store_skips_non_string_values() {
        let path = unique_temp_path("settings-mixed");
        let parent = path.parent().expect("temp path has a parent");
        fs::create_dir_all(parent).expect("create dir");
        fs::write(&path, r#"{"a": "1", "b": 2, "c": null}"#).expect("seed file");

        let store = JsonFileSettingsStore::open(&path).expect("open");
        assert_eq!(store.get("a").expect("get").as_deref(), Some("1"));
        assert_eq!(store.get("b").expect("get"), None);

        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn file_store_rejects_non_object_file() {
        let path = unique_temp_path("settings-array");
        let parent = path.parent().expect("temp path has a parent");
        fs::create_dir_all(parent).expect("create dir");
        fs::write(&path, "[1, 2]").expect("seed file");

        let err = JsonFileSettingsStore::open(&path)
            .err()
            .expect("arrays are not settings");
        assert!(matches!(err, SettingsStoreError::Serialization(_)));

        let _ = fs::remove_dir_all(parent);
    }
}
