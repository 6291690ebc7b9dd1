use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use super::error::{FsError, FsResult};

/// Backing store of one file, shared by every handle opened on it.
///
/// An inode outlives its directory entry: removing a file only drops the
/// name, handles that are still open keep reading and writing the data.
/// Files have a fixed length set at creation; writes stop at the end.
#[derive(Debug)]
pub struct Inode {
    pub id: u64,
    data: Mutex<Vec<u8>>,
    deny_write: AtomicUsize,
}

impl Inode {
    /// A zero-filled inode of `size` bytes, or `NoSpace` when the heap
    /// cannot hold it.
    pub fn new(id: u64, size: usize) -> FsResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|_| FsError::NoSpace)?;
        data.resize(size, 0);
        Ok(Inode {
            id,
            data: Mutex::new(data),
            deny_write: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes starting at `offset`.
    /// Returns 0 at or past the end of the file.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let available = &data[offset..];
        let to_read = buf.len().min(available.len());
        buf[..to_read].copy_from_slice(&available[..to_read]);
        to_read
    }

    /// Write `src` starting at `offset`, stopping at the end of the file.
    /// A write-denied inode accepts nothing.
    pub fn write_at(&self, offset: usize, src: &[u8]) -> usize {
        if self.deny_write.load(Ordering::Acquire) > 0 {
            return 0;
        }
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let to_write = src.len().min(data.len() - offset);
        data[offset..offset + to_write].copy_from_slice(&src[..to_write]);
        to_write
    }

    /// Refuse writes until a matching [`Inode::allow_write`].
    pub fn deny_write(&self) {
        self.deny_write.fetch_add(1, Ordering::AcqRel);
    }

    pub fn allow_write(&self) {
        let prev = self.deny_write.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "allow_write without deny_write");
    }

    pub fn is_write_denied(&self) -> bool {
        self.deny_write.load(Ordering::Acquire) > 0
    }
}
