pub mod error;
pub mod fd;
pub mod file;
pub mod inode;
pub mod ramfs;

use alloc::sync::Arc;

pub use error::{FsError, FsResult};
pub use fd::{Fd, FdError, FdTable, Slot};
pub use file::FileHandle;
pub use inode::Inode;
pub use ramfs::RamFs;

/// Longest file name the filesystem accepts, in bytes.
pub const NAME_MAX: usize = 14;

/// Storage behind named files. Implementations lock internally; every
/// method may be called from any process at any time.
pub trait FileSystem: Send + Sync {
    /// Name of this filesystem (e.g. "ramfs").
    fn name(&self) -> &str;

    /// Create a zero-filled file of `initial_size` bytes.
    fn create(&self, name: &str, initial_size: usize) -> FsResult<()>;

    /// Look up the inode a new handle should wrap.
    fn open(&self, name: &str) -> FsResult<Arc<Inode>>;

    /// Drop the name. Inodes already opened stay alive.
    fn remove(&self, name: &str) -> FsResult<()>;
}
