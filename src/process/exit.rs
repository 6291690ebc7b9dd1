use core::sync::atomic::{AtomicBool, Ordering};
use spin::Once;

use super::ProcessId;
use crate::scheduler::Scheduler;

/// Exit status shared between a child and its parent.
///
/// The child holds one `Arc`, the parent another (until it reaps the child
/// or exits). Whichever side drops last frees the record.
#[derive(Debug)]
pub struct ExitRecord {
    status: Once<i32>,
    parent: Option<ProcessId>,
    orphaned: AtomicBool,
}

impl ExitRecord {
    pub fn new(parent: Option<ProcessId>) -> Self {
        ExitRecord {
            status: Once::new(),
            parent,
            orphaned: AtomicBool::new(parent.is_none()),
        }
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    /// Record the exit status. Only the first call has any effect.
    pub fn publish(&self, status: i32) -> bool {
        let mut first = false;
        self.status.call_once(|| {
            first = true;
            status
        });
        first
    }

    pub fn status(&self) -> Option<i32> {
        self.status.get().copied()
    }

    /// The parent is gone; nobody will wait on this record.
    pub fn orphan(&self) {
        self.orphaned.store(true, Ordering::Release);
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned.load(Ordering::Acquire)
    }

    /// Block the calling parent until the status is published.
    pub fn wait(&self, sched: &dyn Scheduler) -> i32 {
        loop {
            if let Some(status) = self.status() {
                return status;
            }
            sched.block();
        }
    }

    /// Wake the parent after [`ExitRecord::publish`], unless it is gone.
    pub fn notify_parent(&self, sched: &dyn Scheduler) {
        if self.is_orphaned() {
            return;
        }
        if let Some(parent) = self.parent {
            sched.unblock(parent);
        }
    }
}
