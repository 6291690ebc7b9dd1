use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use spin::Mutex;

use super::error::{FsError, FsResult};
use super::inode::Inode;
use super::{FileSystem, NAME_MAX};

// ──────────────────────────────────────────────────────────────
//  RAMFS — flat in-memory filesystem
// ──────────────────────────────────────────────────────────────

struct RamFsInner {
    files: BTreeMap<String, Arc<Inode>>,
    next_id: u64,
}

impl RamFsInner {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// A single flat directory of fixed-size files.
pub struct RamFs {
    label: &'static str,
    inner: Mutex<RamFsInner>,
}

impl RamFs {
    pub fn new(label: &'static str) -> Self {
        RamFs {
            label,
            inner: Mutex::new(RamFsInner {
                files: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Strip a leading `/` and reject names the directory cannot hold.
    fn normalize(name: &str) -> FsResult<&str> {
        let name = name.strip_prefix('/').unwrap_or(name);
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidPath);
        }
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileSystem for RamFs {
    fn name(&self) -> &str {
        self.label
    }

    fn create(&self, name: &str, initial_size: usize) -> FsResult<()> {
        let name = Self::normalize(name)?;
        let mut inner = self.inner.lock();
        if inner.files.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }
        let id = inner.alloc_id();
        let inode = Inode::new(id, initial_size)?;
        inner.files.insert(String::from(name), Arc::new(inode));
        Ok(())
    }

    fn open(&self, name: &str) -> FsResult<Arc<Inode>> {
        let name = Self::normalize(name).map_err(|_| FsError::NotFound)?;
        let inner = self.inner.lock();
        inner.files.get(name).cloned().ok_or(FsError::NotFound)
    }

    fn remove(&self, name: &str) -> FsResult<()> {
        let name = Self::normalize(name).map_err(|_| FsError::NotFound)?;
        let mut inner = self.inner.lock();
        inner.files.remove(name).map(|_| ()).ok_or(FsError::NotFound)
    }
}
