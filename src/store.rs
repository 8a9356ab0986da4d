use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    ffi::OsString,
    fs, io,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// A pretty-printed JSON document on disk with a single in-process writer.
///
/// Every mutation is read whole file, mutate, write whole file. The mutex makes
/// that sequence exclusive for everyone sharing this store; a second process
/// writing the same file can still clobber it.
pub struct JsonStore<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current document. Missing or corrupt files read as default.
    pub fn read(&self) -> T {
        let _guard = self.lock.lock();
        load_or_default(&self.path)
    }

    /// Locks the document for a read-modify-write cycle.
    ///
    /// Nothing is written unless [`StoreGuard::save`] is called.
    pub fn edit(&self) -> StoreGuard<'_, T> {
        let lock = self.lock.lock();
        let value = load_or_default(&self.path);
        StoreGuard {
            path: &self.path,
            _lock: lock,
            value,
        }
    }
}

pub struct StoreGuard<'a, T> {
    path: &'a Path,
    _lock: MutexGuard<'a, ()>,
    value: T,
}

impl<T: Serialize> StoreGuard<'_, T> {
    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(&self.value).map_err(|err| Error::StateWrite {
            path: self.path.to_path_buf(),
            reason: err.to_string(),
        })?;
        write_atomic_text(self.path, &raw).map_err(|err| Error::StateWrite {
            path: self.path.to_path_buf(),
            reason: err.to_string(),
        })?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }
}

impl<T> Deref for StoreGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for StoreGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            warn!(path = %path.display(), %err, "state file unreadable, starting empty");
            return T::default();
        }
    };
    if raw.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), %err, "state file corrupt, starting empty");
            T::default()
        }
    }
}

pub(crate) fn write_atomic_text(path: &Path, contents: &str) -> io::Result<()> {
    write_atomic(path, contents.as_bytes())
}

/// Writes through a sibling temp file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    let mut temp_path = parent.join(temp_name);
    if temp_path.exists() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut temp_name = OsString::from(file_name);
        temp_name.push(format!(".{stamp}.tmp"));
        temp_path = parent.join(temp_name);
    }
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn corrupt_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store: JsonStore<BTreeMap<String, u32>> = JsonStore::new(&path);
        assert!(store.read().is_empty());
    }

    #[test]
    fn edit_without_save_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        let store: JsonStore<BTreeMap<String, u32>> = JsonStore::new(&path);

        {
            let mut guard = store.edit();
            guard.insert("a".into(), 1);
        }
        assert!(!path.exists());

        {
            let mut guard = store.edit();
            guard.insert("a".into(), 1);
            guard.save().unwrap();
        }
        assert_eq!(store.read().get("a"), Some(&1));
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n"), "state is pretty printed");
    }
}
