//! The contract between the kernel core and the thread scheduler.
//!
//! Picking the next thread and switching contexts happen elsewhere; the
//! core only needs to name the running thread, park it, make another one
//! runnable, and start new user threads.

pub mod signal;

use core::fmt;

use crate::arch::TrapFrame;
use crate::process::ProcessId;

pub use signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// No memory for another thread and its kernel stack.
    OutOfMemory,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpawnError::OutOfMemory => write!(f, "Out of memory for a new thread"),
        }
    }
}

/// Each user process runs on exactly one kernel thread, so the process id
/// names the thread too.
///
/// # Wake-up tokens
/// `unblock` on a thread that is not blocked is remembered, and that
/// thread's next `block` returns at once. Callers always re-check their
/// wait condition around `block`, so extra wake-ups are harmless. Unblocking
/// a thread that no longer exists is a no-op.
pub trait Scheduler: Send + Sync {
    /// The thread making the current call.
    fn current(&self) -> ProcessId;

    /// Park the current thread until someone unblocks it.
    fn block(&self);

    /// Make `pid` runnable again.
    fn unblock(&self, pid: ProcessId);

    /// Start a thread for process `pid` that enters user mode with `frame`.
    fn spawn(&self, pid: ProcessId, name: &str, frame: TrapFrame) -> Result<(), SpawnError>;

    /// Tear down the current thread's execution context. Called by the
    /// trap glue after the process has been through `exit`.
    fn exit_current(&self) -> !;
}
