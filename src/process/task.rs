use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

use super::exit::ExitRecord;
use super::ProcessId;
use crate::fs::{FdTable, FileHandle};
use crate::memory::AddressSpace;
use crate::timer::AlarmHandle;

/// A child the parent may still wait for.
#[derive(Debug)]
pub struct Child {
    pub pid: ProcessId,
    pub record: Arc<ExitRecord>,
}

pub struct ProcessInner {
    pub name: String,
    pub space: Arc<dyn AddressSpace>,
    pub fd_table: FdTable,
    pub children: Vec<Child>,
    /// The program image this process runs, held write-denied.
    pub executable: Option<FileHandle>,
    pub alarm: Option<AlarmHandle>,
}

/// A user process and the single kernel thread that runs it.
pub struct Process {
    pid: ProcessId,
    exit: Arc<ExitRecord>,
    inner: Mutex<ProcessInner>,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        parent: Option<ProcessId>,
        name: &str,
        space: Arc<dyn AddressSpace>,
        fd_table: FdTable,
        executable: Option<FileHandle>,
    ) -> Self {
        Process {
            pid,
            exit: Arc::new(ExitRecord::new(parent)),
            inner: Mutex::new(ProcessInner {
                name: String::from(name),
                space,
                fd_table,
                children: Vec::new(),
                executable,
                alarm: None,
            }),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.exit.parent()
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn space(&self) -> Arc<dyn AddressSpace> {
        Arc::clone(&self.inner.lock().space)
    }

    pub fn exit_record(&self) -> &Arc<ExitRecord> {
        &self.exit
    }

    pub fn lock(&self) -> MutexGuard<'_, ProcessInner> {
        self.inner.lock()
    }

    pub fn set_alarm(&self, alarm: Option<AlarmHandle>) {
        self.inner.lock().alarm = alarm;
    }

    pub fn add_child(&self, child: Child) {
        self.inner.lock().children.push(child);
    }

    /// Detach the child `pid` so it can be waited for. `None` if `pid` is
    /// not a child or was already taken.
    pub fn take_child(&self, pid: ProcessId) -> Option<Child> {
        let mut inner = self.inner.lock();
        let index = inner.children.iter().position(|child| child.pid == pid)?;
        Some(inner.children.swap_remove(index))
    }
}
