//! User address spaces as the kernel core sees them.
//!
//! The page tables and the frame allocator live behind [`AddressSpace`] and
//! [`Vmm`]; the core only asks whether a page is mapped, maps fresh zeroed
//! pages for the loader, and copies bytes across the user/kernel boundary.

#[cfg(not(test))]
pub mod paging;
pub mod validate;

use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use x86_64::structures::paging::{Page, Size4KiB};
use x86_64::VirtAddr;

pub use validate::{validate_read, validate_str, validate_write, InvalidAddress};

pub const PAGE_SIZE: u64 = 4096;

/// First address of the kernel range. Everything below is user space.
pub const USER_TOP: u64 = 0x80_0400_0000;

/// Initial top of every user stack.
pub const USER_STACK: u64 = 0x4748_0000;

pub type UserPage = Page<Size4KiB>;

bitflags! {
    /// What user code may do with a mapped page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    OutOfMemory,
    AlreadyMapped,
    KernelRange,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MapError::OutOfMemory => write!(f, "Out of physical frames"),
            MapError::AlreadyMapped => write!(f, "Page already mapped"),
            MapError::KernelRange => write!(f, "Address in kernel range"),
        }
    }
}

/// One process's view of user memory.
pub trait AddressSpace: Send + Sync {
    /// Access rights of `page`, or `None` if it is not mapped.
    fn access(&self, page: UserPage) -> Option<Access>;

    /// Back `page` with a fresh zeroed frame.
    fn map_zeroed(&self, page: UserPage, access: Access) -> Result<(), MapError>;

    /// Copy `dst.len()` bytes of user memory starting at `addr` into `dst`.
    ///
    /// # Safety
    /// Every page covering `[addr, addr + dst.len())` must be mapped.
    unsafe fn copy_in(&self, addr: VirtAddr, dst: &mut [u8]);

    /// Copy `src` into user memory starting at `addr`. Bypasses the
    /// page's `WRITE` bit so the loader can fill read-only segments.
    ///
    /// # Safety
    /// Every page covering `[addr, addr + src.len())` must be mapped.
    unsafe fn copy_out(&self, addr: VirtAddr, src: &[u8]);

    /// Deep copy of every user mapping, for fork.
    fn duplicate(&self) -> Result<Arc<dyn AddressSpace>, MapError>;

    /// Make this space the one the MMU translates through.
    fn activate(&self);
}

/// Source of new, empty address spaces.
pub trait Vmm: Send + Sync {
    fn create_space(&self) -> Result<Arc<dyn AddressSpace>, MapError>;

    /// Switch to the kernel-only tables so a dying process's space can be
    /// released while its thread is still running.
    fn activate_kernel(&self);
}

/// Round `addr` down to its page boundary.
pub const fn page_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}
