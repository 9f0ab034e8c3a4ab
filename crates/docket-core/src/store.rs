use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::event::Event;

pub const DEFAULT_SNAPSHOT_KEY: &str = "events";

/// String-keyed, string-valued persistent storage, the shape of a
/// browser's local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug)]
pub struct FileKeyValueStore {
    pub data_dir: PathBuf,
}

impl FileKeyValueStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened key-value store");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileKeyValueStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            debug!(file = %path.display(), "no entry for key");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), "writing entry atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }
}

/// In-process map; `fail_writes` makes every `set` fail.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    entries: HashMap<String, String>,
    pub fail_writes: bool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let mut store = Self::default();
        store.entries.insert(key.to_string(), value.to_string());
        store
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.fail_writes {
            return Err(anyhow!("storage quota exceeded"));
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The event collection as a single JSON array under one key.
#[derive(Debug)]
pub struct EventStore<K> {
    backend: K,
    key: String,
}

impl<K: KeyValueStore> EventStore<K> {
    pub fn new(backend: K) -> Self {
        Self::with_key(backend, DEFAULT_SNAPSHOT_KEY)
    }

    pub fn with_key(backend: K, key: &str) -> Self {
        Self {
            backend,
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> &K {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut K {
        &mut self.backend
    }

    /// Missing, unreadable or malformed snapshots all load as empty. Of
    /// several records sharing an id only the first is kept.
    #[tracing::instrument(skip(self), fields(key = %self.key))]
    pub fn load(&self) -> Vec<Event> {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("no snapshot stored yet");
                return vec![];
            }
            Err(err) => {
                warn!(error = %err, "failed reading snapshot; starting empty");
                return vec![];
            }
        };

        if raw.trim().is_empty() {
            return vec![];
        }

        match serde_json::from_str::<Vec<Event>>(&raw) {
            Ok(events) => {
                let events = dedupe_ids(events);
                debug!(count = events.len(), "loaded snapshot");
                events
            }
            Err(err) => {
                warn!(error = %err, "malformed snapshot; starting empty");
                vec![]
            }
        }
    }

    #[tracing::instrument(skip(self, events), fields(key = %self.key, count = events.len()))]
    pub fn save_all(&mut self, events: &[Event]) -> Result<(), PersistenceError> {
        let serialized = serde_json::to_string(events).map_err(|err| PersistenceError {
            key: self.key.clone(),
            source: err.into(),
        })?;

        self.backend
            .set(&self.key, &serialized)
            .map_err(|source| PersistenceError {
                key: self.key.clone(),
                source,
            })?;

        debug!("saved snapshot");
        Ok(())
    }
}

fn dedupe_ids(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::with_capacity(events.len());
    events
        .into_iter()
        .filter(|event| {
            let first = seen.insert(event.id);
            if !first {
                warn!(id = event.id, name = %event.name, "dropping duplicate event id from snapshot");
            }
            first
        })
        .collect()
}
