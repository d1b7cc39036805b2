use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use snafu::{ResultExt, ensure};

use crate::error::{InvalidArgumentSnafu, Result, StorageSnafu};

/// Key the sealed backend configuration is stored under.
pub const CONFIG_KEY: &str = "broker_config";

/// Durable key/value storage offered by the host.
pub trait ConfigStorage: Send + Sync + fmt::Debug {
    /// Value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn delete(&self, key: &str) -> Result<()>;
}

fn check_key(key: &str) -> Result<()> {
    ensure!(
        !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        InvalidArgumentSnafu { message: format!("storage key {key:?} must be non-empty [A-Za-z0-9_-]") }
    );
    Ok(())
}

/// Storage kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryConfigStorage {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryConfigStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStorage for MemoryConfigStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        check_key(key)?;
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Storage in a directory, one `<key>.bin` file per key.
///
/// Writes go to a temporary file in the same directory that is renamed over
/// the target, so a crash leaves either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    dir: PathBuf,
}

impl FileConfigStorage {
    /// Storage rooted at `dir`, created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`IamError::Storage`](crate::IamError::Storage) if the
    /// directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).context(StorageSnafu { path: dir.display().to_string() })?;
        Ok(Self { dir })
    }

    /// Directory the files live in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.dir.join(format!("{key}.bin")))
    }
}

impl ConfigStorage for FileConfigStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(StorageSnafu { path: path.display().to_string() }),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path(key)?;
        let tmp = self.dir.join(format!(".{key}.bin.tmp"));
        std::fs::write(&tmp, value).context(StorageSnafu { path: tmp.display().to_string() })?;
        std::fs::rename(&tmp, &path).context(StorageSnafu { path: path.display().to_string() })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(StorageSnafu { path: path.display().to_string() }),
        }
    }
}
