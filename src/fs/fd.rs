//! Per-process file descriptor table.

use alloc::vec::Vec;
use core::fmt;

use super::file::FileHandle;

/// A descriptor number as user code sees it.
pub type Fd = i32;

pub const STDIN_FILENO: Fd = 0;
pub const STDOUT_FILENO: Fd = 1;

/// Most descriptors one process may hold, the two console slots included.
pub const FD_LIMIT: usize = 128;

/// What a descriptor index currently names.
#[derive(Debug, Clone)]
pub enum Slot {
    Empty,
    ConsoleIn,
    ConsoleOut,
    File(FileHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdError {
    /// The index is out of range, unallocated, or not a file.
    InvalidDescriptor(Fd),
    /// Every slot up to [`FD_LIMIT`] is taken.
    TableFull,
}

impl fmt::Display for FdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FdError::InvalidDescriptor(fd) => write!(f, "Bad file descriptor {}", fd),
            FdError::TableFull => write!(f, "Too many open files"),
        }
    }
}

/// Slots 0 and 1 are the console and can never be replaced or closed.
/// Every other slot is either `Empty` or holds exactly one live handle.
///
/// Cloning the table (fork) clones every handle, so parent and child move
/// their positions independently from then on.
#[derive(Debug, Clone)]
pub struct FdTable {
    slots: Vec<Slot>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(8);
        slots.push(Slot::ConsoleIn);
        slots.push(Slot::ConsoleOut);
        FdTable { slots }
    }

    /// Bind `file` to the lowest free index, which is always ≥ 2.
    pub fn install(&mut self, file: FileHandle) -> Result<Fd, FdError> {
        let free = self
            .slots
            .iter()
            .skip(2)
            .position(|slot| matches!(slot, Slot::Empty))
            .map(|i| i + 2);

        let index = match free {
            Some(index) => index,
            None if self.slots.len() < FD_LIMIT => {
                self.slots.push(Slot::Empty);
                self.slots.len() - 1
            }
            None => return Err(FdError::TableFull),
        };
        self.slots[index] = Slot::File(file);
        Ok(index as Fd)
    }

    /// Whatever `fd` names; out-of-range indices read as `Empty`.
    pub fn slot(&self, fd: Fd) -> &Slot {
        usize::try_from(fd)
            .ok()
            .and_then(|index| self.slots.get(index))
            .unwrap_or(&Slot::Empty)
    }

    /// The file bound to `fd`.
    pub fn file_mut(&mut self, fd: Fd) -> Result<&mut FileHandle, FdError> {
        let slot = usize::try_from(fd)
            .ok()
            .and_then(|index| self.slots.get_mut(index));
        match slot {
            Some(Slot::File(file)) => Ok(file),
            _ => Err(FdError::InvalidDescriptor(fd)),
        }
    }

    /// Release the file bound to `fd` and tombstone its slot. The console
    /// slots and unallocated indices are rejected without side effects.
    pub fn close(&mut self, fd: Fd) -> Result<(), FdError> {
        self.file_mut(fd)?;
        let index = fd as usize;
        self.slots[index] = Slot::Empty;
        while self.slots.len() > 2 && matches!(self.slots.last(), Some(Slot::Empty)) {
            self.slots.pop();
        }
        Ok(())
    }

    /// Drop every open file, keeping the console slots.
    pub fn close_all(&mut self) {
        self.slots.truncate(2);
    }

    /// Number of open files (console slots excluded).
    pub fn open_files(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::File(_)))
            .count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
