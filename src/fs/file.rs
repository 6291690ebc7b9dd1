use alloc::sync::Arc;

use super::inode::Inode;

/// An open file: a shared inode plus a position private to this handle.
///
/// Cloning a handle (fork) gives the copy its own position; the two never
/// move each other's offset even though they share the inode.
#[derive(Debug)]
pub struct FileHandle {
    inode: Arc<Inode>,
    pos: usize,
    denies_write: bool,
}

impl FileHandle {
    pub fn new(inode: Arc<Inode>) -> Self {
        FileHandle {
            inode,
            pos: 0,
            denies_write: false,
        }
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn len(&self) -> usize {
        self.inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode.is_empty()
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.inode.read_at(self.pos, buf);
        self.pos += n;
        n
    }

    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = self.inode.write_at(self.pos, src);
        self.pos += n;
        n
    }

    /// Read at an absolute offset without moving the position.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(offset, buf)
    }

    /// Positions past the end are allowed; reads there return 0.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Block writes to the underlying file for as long as this handle
    /// lives. Used for the executable a process is running.
    pub fn deny_write(&mut self) {
        if !self.denies_write {
            self.inode.deny_write();
            self.denies_write = true;
        }
    }
}

impl Clone for FileHandle {
    fn clone(&self) -> Self {
        if self.denies_write {
            self.inode.deny_write();
        }
        FileHandle {
            inode: Arc::clone(&self.inode),
            pos: self.pos,
            denies_write: self.denies_write,
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.denies_write {
            self.inode.allow_write();
        }
    }
}
