//! Process lifecycle: fork, exec, wait and exit.
//!
//! Every user process owns an address space, a descriptor table and the
//! list of children it may still wait for. Exit statuses outlive the
//! process itself through an [`ExitRecord`] shared with the parent.

pub mod exit;
pub mod task;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::arch::TrapFrame;
use crate::fs::{FdTable, FileHandle};
use crate::kernel::Kernel;
use crate::loader::{self, ExecError};
use crate::memory::MapError;
use crate::scheduler::SpawnError;
use crate::{log_info, log_warn};

pub use exit::ExitRecord;
pub use task::{Child, Process, ProcessInner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    NoProcess,
    AddressSpace(MapError),
    Thread(SpawnError),
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ForkError::NoProcess => write!(f, "No current process"),
            ForkError::AddressSpace(e) => write!(f, "Cannot copy address space: {}", e),
            ForkError::Thread(e) => write!(f, "Cannot start thread: {}", e),
        }
    }
}

impl From<MapError> for ForkError {
    fn from(e: MapError) -> Self {
        ForkError::AddressSpace(e)
    }
}

impl From<SpawnError> for ForkError {
    fn from(e: SpawnError) -> Self {
        ForkError::Thread(e)
    }
}

/// Every live process, by id.
pub struct ProcessTable {
    procs: Mutex<BTreeMap<ProcessId, Arc<Process>>>,
    next_pid: AtomicU64,
}

impl ProcessTable {
    pub const fn new() -> Self {
        ProcessTable {
            procs: Mutex::new(BTreeMap::new()),
            next_pid: AtomicU64::new(1),
        }
    }

    pub fn alloc_pid(&self) -> ProcessId {
        ProcessId(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, process: Arc<Process>) {
        self.procs.lock().insert(process.pid(), process);
    }

    pub fn get(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.procs.lock().get(&pid).cloned()
    }

    pub fn remove(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.procs.lock().remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.procs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.processes.get(self.scheduler.current())
    }

    /// Load `cmdline` as the first user process, which has no parent.
    pub fn spawn_initial(&self, cmdline: &str) -> Result<ProcessId, ExecError> {
        let argv: Vec<&str> = cmdline.split_whitespace().collect();
        let name = *argv.first().ok_or(ExecError::EmptyCommand)?;
        let mut exe = self.open_executable(name)?;
        let image = loader::load(self.vmm.as_ref(), &exe, &argv)?;
        exe.deny_write();

        let pid = self.processes.alloc_pid();
        let frame = image.frame();
        let process = Process::new(pid, None, name, image.space, FdTable::new(), Some(exe));
        self.processes.insert(Arc::new(process));

        if let Err(e) = self.scheduler.spawn(pid, name, frame) {
            self.processes.remove(pid);
            return Err(ExecError::Thread(e));
        }
        log_info!("process: started '{}' as PID {}", name, pid);
        Ok(pid)
    }

    /// Clone the current process. The child resumes from `frame` with
    /// `rax = 0`; the parent gets the child's id.
    pub fn fork(&self, name: &str, frame: &TrapFrame) -> Result<ProcessId, ForkError> {
        let parent = self.current_process().ok_or(ForkError::NoProcess)?;
        let (space, fd_table, executable) = {
            let inner = parent.lock();
            (
                inner.space.duplicate()?,
                inner.fd_table.clone(),
                inner.executable.clone(),
            )
        };

        let pid = self.processes.alloc_pid();
        let child = Arc::new(Process::new(
            pid,
            Some(parent.pid()),
            name,
            space,
            fd_table,
            executable,
        ));
        parent.add_child(Child {
            pid,
            record: Arc::clone(child.exit_record()),
        });
        self.processes.insert(child);

        let mut child_frame = *frame;
        child_frame.rax = 0;
        if let Err(e) = self.scheduler.spawn(pid, name, child_frame) {
            parent.take_child(pid);
            self.processes.remove(pid);
            log_warn!("fork: PID {} could not start a thread: {}", parent.pid(), e);
            return Err(e.into());
        }
        Ok(pid)
    }

    /// Replace the current process image with the program `cmdline`
    /// names. On success `frame` enters the new program; on failure the
    /// old image is untouched and the caller is expected to exit.
    pub fn exec(&self, cmdline: &str, frame: &mut TrapFrame) -> Result<(), ExecError> {
        let process = self.current_process().ok_or(ExecError::NoProcess)?;
        let argv: Vec<&str> = cmdline.split_whitespace().collect();
        let name = *argv.first().ok_or(ExecError::EmptyCommand)?;

        let mut exe = self.open_executable(name)?;
        let image = loader::load(self.vmm.as_ref(), &exe, &argv)?;
        exe.deny_write();
        *frame = image.frame();
        image.space.activate();

        let (old_space, old_exe) = {
            let mut inner = process.lock();
            inner.name = name.into();
            (
                mem::replace(&mut inner.space, image.space),
                mem::replace(&mut inner.executable, Some(exe)),
            )
        };
        drop(old_exe);
        drop(old_space);
        Ok(())
    }

    /// Wait for the child `pid` to exit and return its status. Returns -1
    /// if `pid` is not a child of the caller or was already waited for.
    pub fn wait(&self, pid: ProcessId) -> i32 {
        let child = match self.current_process().and_then(|p| p.take_child(pid)) {
            Some(child) => child,
            None => return -1,
        };
        child.record.wait(self.scheduler.as_ref())
    }

    /// Terminate the current process with `status`. The thread itself is
    /// torn down afterwards by `Scheduler::exit_current`.
    pub fn exit(&self, status: i32) {
        let sched = self.scheduler.as_ref();
        let pid = sched.current();
        let process = match self.processes.remove(pid) {
            Some(process) => process,
            None => {
                log_warn!("exit: PID {} is not a user process", pid);
                return;
            }
        };

        let name = {
            let mut inner = process.lock();
            if let Some(alarm) = inner.alarm.take() {
                self.timer.cancel(alarm);
            }
            inner.fd_table.close_all();
            inner.executable = None;
            for child in inner.children.drain(..) {
                child.record.orphan();
            }
            inner.name.clone()
        };
        self.console
            .put_bytes(format!("{}: exit({})\n", name, status).as_bytes());

        let record = Arc::clone(process.exit_record());
        self.vmm.activate_kernel();
        drop(process);

        record.publish(status);
        record.notify_parent(sched);
    }

    /// Hand the scheduler's next thread its address space.
    pub fn switch_to(&self, pid: ProcessId) {
        match self.processes.get(pid) {
            Some(process) => process.space().activate(),
            None => self.vmm.activate_kernel(),
        }
    }

    fn open_executable(&self, name: &str) -> Result<FileHandle, ExecError> {
        let inode = self
            .fs
            .open(name)
            .map_err(|_| ExecError::FileNotFound)?;
        Ok(FileHandle::new(inode))
    }
}
