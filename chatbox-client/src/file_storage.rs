use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chatbox_core::{DEFAULT_QUOTA_BYTES, StoragePort, StoreError, entry_size};
use tracing::{info, warn};

/// Upper bound on the storage file read at startup. JSON escaping can
/// inflate entries, so this is well above the default quota.
pub const MAX_STORAGE_FILE_BYTES: u64 = 32 * 1024 * 1024;

/// Storage port persisted as one JSON object (`key -> JSON text`) on disk.
///
/// Entries are cached in memory; every write rewrites the file through a
/// temp file and rename. A file that cannot be read back is moved aside to
/// `<name>.corrupt` and the store starts empty.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    quota: usize,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_quota(path, DEFAULT_QUOTA_BYTES)
    }

    pub fn open_with_quota(path: impl Into<PathBuf>, quota: usize) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let entries = load_entries(&path)?;
        info!(path = %path.display(), entries = entries.len(), "storage opened");
        Ok(Self {
            path,
            quota,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("file storage lock poisoned".to_owned()))
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(entries)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };

    if meta.len() > MAX_STORAGE_FILE_BYTES {
        warn!(
            path = %path.display(),
            "storage file too large: {} bytes (max {})",
            meta.len(),
            MAX_STORAGE_FILE_BYTES
        );
        move_aside(path)?;
        return Ok(BTreeMap::new());
    }

    let data = fs::read_to_string(path)?;
    match serde_json::from_str(&data) {
        Ok(entries) => Ok(entries),
        Err(err) => {
            warn!(path = %path.display(), "storage file unreadable: {}", err);
            move_aside(path)?;
            Ok(BTreeMap::new())
        }
    }
}

fn move_aside(path: &Path) -> Result<(), StoreError> {
    let aside = path.with_extension("json.corrupt");
    fs::rename(path, &aside)?;
    warn!(path = %aside.display(), "moved unreadable storage file aside");
    Ok(())
}

impl StoragePort for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        let others: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| entry_size(k, v))
            .sum();
        let needed = others + entry_size(key, value);
        if needed > self.quota {
            return Err(StoreError::QuotaExceeded {
                needed,
                quota: self.quota,
            });
        }

        let previous = entries.insert(key.to_owned(), value.to_owned());
        if let Err(err) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_owned(), previous),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&entries) {
            entries.insert(key.to_owned(), previous);
            return Err(err);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
