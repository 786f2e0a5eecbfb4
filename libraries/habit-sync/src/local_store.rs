//! Durable key-value persistence on the user's device.
//!
//! Nothing in here is allowed to take the app down: read and write failures are logged and
//! treated as "no cached data".

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, SecondsFormat, Utc};
use habit_utils::HabitData;

pub const HABIT_DATA_KEY: &str = "habitData";
pub const LAST_SYNC_KEY: &str = "lastSyncTime";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Corrupted snapshot: {0}")]
    Corrupted(#[from] serde_json::Error),
    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// String keys to string values, like the browser's `localStorage`.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        // write to a sibling file first so a crash mid-write never leaves a truncated snapshot
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Typed access to the habit snapshot and the last sync time.
pub struct LocalStore {
    backend: Box<dyn KeyValueStore>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

impl LocalStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn save(&self, data: &HabitData) {
        let _ = self
            .try_save(data)
            .inspect_err(|e| log::warn!("Failed to save habit data: {e}"));
    }

    pub fn try_save(&self, data: &HabitData) -> Result<(), StoreError> {
        let json = serde_json::to_string(data)?;
        self.backend.set(HABIT_DATA_KEY, &json)
    }

    /// The last saved snapshot, or `None` if there is none or it can't be read.
    pub fn load(&self) -> Option<HabitData> {
        self.try_load()
            .inspect_err(|e| log::warn!("Failed to load habit data: {e}"))
            .ok()
            .flatten()
    }

    pub fn try_load(&self) -> Result<Option<HabitData>, StoreError> {
        let Some(json) = self.backend.get(HABIT_DATA_KEY)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    pub fn save_last_sync(&self, time: DateTime<Utc>) {
        let value = time.to_rfc3339_opts(SecondsFormat::Millis, true);
        let _ = self
            .backend
            .set(LAST_SYNC_KEY, &value)
            .inspect_err(|e| log::warn!("Failed to save last sync time: {e}"));
    }

    pub fn load_last_sync(&self) -> Option<DateTime<Utc>> {
        let value = self
            .backend
            .get(LAST_SYNC_KEY)
            .inspect_err(|e| log::warn!("Failed to load last sync time: {e}"))
            .ok()
            .flatten()?;
        DateTime::parse_from_rfc3339(value.trim())
            .map(|time| time.with_timezone(&Utc))
            .inspect_err(|e| log::warn!("Ignoring unreadable last sync time `{value}`: {e}"))
            .ok()
    }

    pub fn clear(&self) {
        for key in [HABIT_DATA_KEY, LAST_SYNC_KEY] {
            let _ = self
                .backend
                .remove(key)
                .inspect_err(|e| log::warn!("Failed to remove {key}: {e}"));
        }
    }
}
