use core::sync::atomic::{AtomicBool, Ordering};

use super::Scheduler;
use crate::process::ProcessId;

/// One-shot wait/notify pair between a single waiter and its waker.
#[derive(Debug)]
pub struct Signal {
    waiter: ProcessId,
    fired: AtomicBool,
}

impl Signal {
    pub fn new(waiter: ProcessId) -> Self {
        Signal {
            waiter,
            fired: AtomicBool::new(false),
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Block the waiter until [`Signal::notify`] has run.
    pub fn wait(&self, sched: &dyn Scheduler) {
        while !self.is_fired() {
            sched.block();
        }
    }

    /// Release the waiter. Never blocks, safe from interrupt context.
    pub fn notify(&self, sched: &dyn Scheduler) {
        self.fired.store(true, Ordering::Release);
        sched.unblock(self.waiter);
    }
}
