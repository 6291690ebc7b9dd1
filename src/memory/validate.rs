//! User pointer validation.
//!
//! Every pointer that arrives in a syscall register is checked here before
//! the kernel touches it. A failed check is fatal to the calling process:
//! the dispatcher turns [`InvalidAddress`] into `exit(-1)`.
//!
//! # Checks
//! - the pointer is not null
//! - the whole range sits below [`USER_TOP`] and does not wrap
//! - every page covering the range is mapped with the required access
//!
//! A successful check yields a proof object ([`UserBuffer`],
//! [`UserBufferMut`]) that is the only way to copy bytes in or out. The
//! proof is valid for the current syscall only.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use x86_64::VirtAddr;

use super::{page_down, Access, AddressSpace, UserPage, PAGE_SIZE, USER_TOP};

/// Longest user string (including the terminator) the kernel will copy.
pub const MAX_USER_STR: usize = 4096;

/// A user pointer the kernel refuses to dereference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAddress {
    pub addr: u64,
}

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid user address {:#x}", self.addr)
    }
}

/// A validated, readable user range.
pub struct UserBuffer<'a> {
    space: &'a dyn AddressSpace,
    addr: u64,
    len: usize,
}

impl<'a> UserBuffer<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy bytes starting `offset` bytes into the buffer into `dst`.
    /// Returns how many bytes were copied.
    pub fn copy_to(&self, offset: usize, dst: &mut [u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let count = dst.len().min(self.len - offset);
        // SAFETY: the range was checked page by page when `self` was built.
        unsafe {
            self.space
                .copy_in(VirtAddr::new(self.addr + offset as u64), &mut dst[..count]);
        }
        count
    }
}

/// A validated, writable user range.
pub struct UserBufferMut<'a> {
    space: &'a dyn AddressSpace,
    addr: u64,
    len: usize,
}

impl<'a> UserBufferMut<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `src` into the buffer at `offset`, truncated to the buffer's
    /// end. Returns how many bytes were copied.
    pub fn copy_from(&mut self, offset: usize, src: &[u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let count = src.len().min(self.len - offset);
        // SAFETY: the range was checked page by page when `self` was built.
        unsafe {
            self.space
                .copy_out(VirtAddr::new(self.addr + offset as u64), &src[..count]);
        }
        count
    }
}

fn check_range(
    space: &dyn AddressSpace,
    ptr: u64,
    len: usize,
    access: Access,
) -> Result<(), InvalidAddress> {
    let fault = InvalidAddress { addr: ptr };

    if ptr == 0 || ptr >= USER_TOP {
        return Err(fault);
    }
    let end = ptr.checked_add(len as u64).ok_or(fault)?;
    if end > USER_TOP {
        return Err(fault);
    }
    if len == 0 {
        return Ok(());
    }

    let first = UserPage::containing_address(VirtAddr::new(ptr));
    let last = UserPage::containing_address(VirtAddr::new(end - 1));
    for page in UserPage::range_inclusive(first, last) {
        match space.access(page) {
            Some(granted) if granted.contains(access) => {}
            _ => {
                return Err(InvalidAddress {
                    addr: page.start_address().as_u64().max(ptr),
                })
            }
        }
    }
    Ok(())
}

/// Validate a buffer the kernel will read from.
pub fn validate_read(
    space: &dyn AddressSpace,
    ptr: u64,
    len: usize,
) -> Result<UserBuffer<'_>, InvalidAddress> {
    check_range(space, ptr, len, Access::READ)?;
    Ok(UserBuffer {
        space,
        addr: ptr,
        len,
    })
}

/// Validate a buffer the kernel will write into. The pages must be
/// writable by the user, not merely mapped.
pub fn validate_write(
    space: &dyn AddressSpace,
    ptr: u64,
    len: usize,
) -> Result<UserBufferMut<'_>, InvalidAddress> {
    check_range(space, ptr, len, Access::READ | Access::WRITE)?;
    Ok(UserBufferMut {
        space,
        addr: ptr,
        len,
    })
}

/// Copy a NUL-terminated user string into a kernel `String`.
///
/// Pages are checked one at a time before they are read, so a string that
/// runs off the end of its mapping faults at the first unmapped page
/// rather than at the next page boundary the caller happened to name.
pub fn validate_str(space: &dyn AddressSpace, ptr: u64) -> Result<String, InvalidAddress> {
    if ptr == 0 || ptr >= USER_TOP {
        return Err(InvalidAddress { addr: ptr });
    }
    let mut bytes = Vec::new();
    let mut cursor = ptr;

    loop {
        let page_end = page_down(cursor) + PAGE_SIZE;
        let budget = MAX_USER_STR - bytes.len();
        let chunk_len = ((page_end - cursor) as usize).min(budget);
        let chunk = validate_read(space, cursor, chunk_len)?;

        let mut scratch = vec![0u8; chunk_len];
        chunk.copy_to(0, &mut scratch);
        if let Some(nul) = scratch.iter().position(|&b| b == 0) {
            bytes.extend_from_slice(&scratch[..nul]);
            break;
        }
        bytes.extend_from_slice(&scratch);

        if bytes.len() >= MAX_USER_STR {
            return Err(InvalidAddress { addr: ptr });
        }
        cursor += chunk_len as u64;
    }

    String::from_utf8(bytes).map_err(|_| InvalidAddress { addr: ptr })
}
