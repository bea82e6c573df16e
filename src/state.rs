//! Persisted per-server isolation mode.
//!
//! `state.json` maps each installed server key to the mode it was installed
//! under. Every read-modify-write holds an exclusive `fs2` lock on a sibling
//! `state.json.lock` so concurrent invocations cannot lose updates.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::errors::StateError;
use crate::types::{IsolationMode, ServerKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    pub isolation: IsolationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

pub type StateMap = BTreeMap<String, ServerState>;

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn io_err(&self, action: &'static str, source: std::io::Error) -> StateError {
        StateError::Io {
            action,
            path: self.path.clone(),
            source,
        }
    }

    fn lock(&self) -> Result<File, StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err("create directory for", e))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| self.io_err("open lock for", e))?;
        FileExt::lock_exclusive(&file).map_err(|e| self.io_err("lock", e))?;
        Ok(file)
    }

    fn read_unlocked(&self) -> Result<StateMap, StateError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(StateMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateMap::new()),
            Err(e) => Err(self.io_err("read", e)),
        }
    }

    fn write_unlocked(&self, map: &StateMap) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(map).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_err("write", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err("replace", e))
    }

    /// Snapshot of all entries. A missing file is an empty map.
    pub fn load(&self) -> Result<StateMap, StateError> {
        let _guard = self.lock()?;
        self.read_unlocked()
    }

    pub fn get(&self, key: &ServerKey) -> Result<Option<ServerState>, StateError> {
        Ok(self.load()?.remove(key.as_str()))
    }

    /// Apply `f` to the map under the lock and persist the result.
    pub fn update<T>(&self, f: impl FnOnce(&mut StateMap) -> T) -> Result<T, StateError> {
        let _guard = self.lock()?;
        let mut map = self.read_unlocked()?;
        let out = f(&mut map);
        self.write_unlocked(&map)?;
        Ok(out)
    }

    /// Record `mode` for `key`, keeping the original install time when the mode is unchanged.
    pub fn set_isolation(&self, key: &ServerKey, mode: IsolationMode) -> Result<(), StateError> {
        self.update(|map| {
            let installed_at = map
                .get(key.as_str())
                .filter(|s| s.isolation == mode)
                .and_then(|s| s.installed_at)
                .unwrap_or_else(Utc::now);
            map.insert(
                key.as_str().to_string(),
                ServerState {
                    isolation: mode,
                    installed_at: Some(installed_at),
                },
            );
        })
    }

    /// Forget `key`. Returns the removed entry, if any.
    pub fn remove(&self, key: &ServerKey) -> Result<Option<ServerState>, StateError> {
        self.update(|map| map.remove(key.as_str()))
    }
}
