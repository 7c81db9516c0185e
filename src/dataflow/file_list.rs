// src/dataflow/file_list.rs

//! Per-project reference-counted file store.
//!
//! Every file-typed value holds a [`FileHandle`]. When the last handle to a
//! file inside the project directory goes away, the file is deleted. Files
//! outside the project are counted but never deleted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::fs::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum FileKey {
    /// Relative to the project base directory.
    Project(String),
    External(PathBuf),
}

pub struct FileList {
    base_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    refs: Mutex<BTreeMap<FileKey, usize>>,
    /// Off while a project is loading or shutting down, so that tearing down
    /// a value tree never deletes data.
    deletions_enabled: AtomicBool,
}

impl fmt::Debug for FileList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileList")
            .field("base_dir", &self.base_dir)
            .field("files", &self.len())
            .finish_non_exhaustive()
    }
}

impl FileList {
    pub fn new(base_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Arc<Self> {
        Arc::new(Self {
            base_dir: base_dir.into(),
            fs,
            refs: Mutex::new(BTreeMap::new()),
            deletions_enabled: AtomicBool::new(false),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn set_deletions_enabled(&self, enabled: bool) {
        self.deletions_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Take a reference on `path` (relative to the base dir, or absolute).
    pub fn acquire(self: &Arc<Self>, path: &str) -> FileHandle {
        let key = self.key_for(path);
        let mut refs = self.refs.lock().unwrap_or_else(PoisonError::into_inner);
        *refs.entry(key.clone()).or_insert(0) += 1;
        FileHandle {
            key,
            list: Arc::clone(self),
        }
    }

    pub fn refcount(&self, path: &str) -> usize {
        let key = self.key_for(path);
        let refs = self.refs.lock().unwrap_or_else(PoisonError::into_inner);
        refs.get(&key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key_for(&self, path: &str) -> FileKey {
        let p = Path::new(path);
        if p.is_absolute() {
            match p.strip_prefix(&self.base_dir) {
                Ok(rel) => FileKey::Project(rel.to_string_lossy().into_owned()),
                Err(_) => FileKey::External(p.to_path_buf()),
            }
        } else {
            FileKey::Project(path.to_string())
        }
    }

    fn add_ref(&self, key: &FileKey) {
        let mut refs = self.refs.lock().unwrap_or_else(PoisonError::into_inner);
        *refs.entry(key.clone()).or_insert(0) += 1;
    }

    fn release(&self, key: &FileKey) {
        let last = {
            let mut refs = self.refs.lock().unwrap_or_else(PoisonError::into_inner);
            match refs.get_mut(key) {
                Some(n) if *n > 1 => {
                    *n -= 1;
                    false
                }
                Some(_) => {
                    refs.remove(key);
                    true
                }
                None => false,
            }
        };
        if !last || !self.deletions_enabled.load(Ordering::SeqCst) {
            return;
        }
        if let FileKey::Project(rel) = key {
            let full = self.base_dir.join(rel);
            if self.fs.is_file(&full) {
                match self.fs.remove_file(&full) {
                    Ok(()) => debug!(file = %full.display(), "released last reference; file removed"),
                    Err(e) => warn!(file = %full.display(), error = %e, "could not remove released file"),
                }
            }
        }
    }
}

/// A counted reference to a file in a project's [`FileList`].
pub struct FileHandle {
    key: FileKey,
    list: Arc<FileList>,
}

impl FileHandle {
    /// The path as stored in values: relative for project files.
    pub fn path(&self) -> String {
        match &self.key {
            FileKey::Project(rel) => rel.clone(),
            FileKey::External(abs) => abs.to_string_lossy().into_owned(),
        }
    }

    pub fn absolute(&self) -> PathBuf {
        match &self.key {
            FileKey::Project(rel) => self.list.base_dir.join(rel),
            FileKey::External(abs) => abs.clone(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self.key, FileKey::External(_))
    }
}

impl Clone for FileHandle {
    fn clone(&self) -> Self {
        self.list.add_ref(&self.key);
        Self {
            key: self.key.clone(),
            list: Arc::clone(&self.list),
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.list.release(&self.key);
    }
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileHandle").field(&self.path()).finish()
    }
}
