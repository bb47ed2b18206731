//! Durable storage for files a task declares as worth keeping.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Makes a task output durable and returns where it now lives.
pub trait DurableStorage: Send + Sync + fmt::Debug {
    fn persist(&self, path: &Path) -> io::Result<PathBuf>;
}

/// For workers whose output directory already is durable: verifies the file
/// exists and keeps it where it is.
#[derive(Debug, Default, Clone, Copy)]
pub struct InPlaceStorage;

impl DurableStorage for InPlaceStorage {
    fn persist(&self, path: &Path) -> io::Result<PathBuf> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(path.to_path_buf())
    }
}

/// Copies files out of an ephemeral output directory into `root`,
/// namespaced by the name of the directory they came from (the task id).
#[derive(Debug, Clone)]
pub struct CopyStorage {
    root: PathBuf,
}

impl CopyStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DurableStorage for CopyStorage {
    fn persist(&self, path: &Path) -> io::Result<PathBuf> {
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            )
        })?;
        let namespace = path
            .parent()
            .and_then(|p| p.file_name())
            .map(PathBuf::from)
            .unwrap_or_default();

        let dest_dir = self.root.join(namespace);
        std::fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(file_name);
        std::fs::copy(path, &dest)?;
        Ok(dest)
    }
}
