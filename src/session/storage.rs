use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::error::Error;

/// Key/value persistence for session state.
///
/// Implementations must apply a batch of changes as one step, and read a batch
/// of keys as one step: [`get_many`](CredentialStorage::get_many) never
/// observes half of an [`apply`](CredentialStorage::apply).
///
/// # Example
///
/// ```rust,ignore
/// impl CredentialStorage for KeyringStorage {
///     fn get(&self, key: &str) -> Result<Option<String>, Error> {
///         self.keyring.read(key).map_err(|e| Error::Storage(e.to_string()))
///     }
///
///     fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, Error> {
///         let tx = self.keyring.read_transaction();
///         keys.iter()
///             .map(|key| tx.read(key).map_err(|e| Error::Storage(e.to_string())))
///             .collect()
///     }
///
///     fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
///         let mut tx = self.keyring.transaction();
///         for (key, value) in changes {
///             match value {
///                 Some(v) => tx.set(key, v),
///                 None => tx.delete(key),
///             }
///         }
///         tx.commit().map_err(|e| Error::Storage(e.to_string()))
///     }
/// }
/// ```
pub trait CredentialStorage: Send + Sync {
    /// Read one key.
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Read several keys from one consistent snapshot, in order.
    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, Error>;

    /// Set (`Some`) or remove (`None`) several keys atomically.
    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error>;
}

/// In-process storage. Nothing outlives the value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Storage("memory storage lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, Error> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Storage("memory storage lock poisoned".into()))?;
        Ok(keys.iter().map(|key| entries.get(*key).cloned()).collect())
    }

    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("memory storage lock poisoned".into()))?;
        apply_changes(&mut entries, changes);
        Ok(())
    }
}

/// JSON object on disk, rewritten through a temporary file and a rename.
///
/// On Unix the file is readable by its owner only (`0600`).
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Storage backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>, Error> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(HashMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::Storage(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(Error::Storage(format!("{}: {e}", self.path.display()))),
        }
    }

    fn store(&self, entries: &HashMap<String, String>) -> Result<(), Error> {
        let io_err = |e: std::io::Error| Error::Storage(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        write_private(&tmp, text.as_bytes()).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl CredentialStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.load()?.remove(key))
    }

    fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, Error> {
        let mut entries = self.load()?;
        Ok(keys.iter().map(|key| entries.remove(*key)).collect())
    }

    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), Error> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Storage("file storage lock poisoned".into()))?;
        let mut entries = self.load()?;
        apply_changes(&mut entries, changes);
        self.store(&entries)
    }
}

/// Writes `contents` to `path`, owner-only on Unix.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        // `mode` only applies on creation; a stale temp file keeps its bits.
        if path.exists() {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn apply_changes(entries: &mut HashMap<String, String>, changes: &[(&str, Option<&str>)]) {
    for (key, value) in changes {
        match value {
            Some(value) => {
                entries.insert((*key).to_owned(), (*value).to_owned());
            }
            None => {
                entries.remove(*key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_apply_sets_and_removes() {
        let storage = MemoryStorage::new();
        storage.apply(&[("a", Some("1")), ("b", Some("2"))]).unwrap();
        storage.apply(&[("a", None), ("b", Some("3"))]).unwrap();

        assert_eq!(storage.get("a").unwrap(), None);
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get("accessToken").unwrap(), None);
        storage
            .apply(&[("accessToken", Some("t")), ("userCpf", Some("52998224725"))])
            .unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get("accessToken").unwrap().as_deref(), Some("t"));

        reopened.apply(&[("accessToken", None)]).unwrap();
        assert_eq!(storage.get("accessToken").unwrap(), None);
        assert_eq!(storage.get("userCpf").unwrap().as_deref(), Some("52998224725"));
    }

    #[test]
    fn get_many_reads_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileStorage::new(dir.path().join("session.json"));
        let memory = MemoryStorage::new();
        let storages: [&dyn CredentialStorage; 2] = [&file, &memory];

        for storage in storages {
            storage.apply(&[("a", Some("1")), ("c", Some("3"))]).unwrap();
            let values = storage.get_many(&["c", "b", "a"]).unwrap();
            assert_eq!(values, vec![Some("3".to_owned()), None, Some("1".to_owned())]);
        }
    }

    #[cfg(unix)]
    #[test]
    fn file_storage_is_private_to_its_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let storage = FileStorage::new(&path);
        storage.apply(&[("accessToken", Some("t"))]).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);

        // A leftover temp file with loose bits does not leak into the result.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, "{}").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();
        storage.apply(&[("accessToken", Some("u"))]).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn file_storage_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileStorage::new(&path).get("accessToken").unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
