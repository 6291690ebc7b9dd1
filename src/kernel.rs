use alloc::sync::Arc;

use crate::drivers::Console;
use crate::fs::FileSystem;
use crate::log_info;
use crate::memory::Vmm;
use crate::process::ProcessTable;
use crate::scheduler::Scheduler;
use crate::timer::Timer;

/// Kernel-wide state behind the syscall boundary, wired to the
/// collaborators that own scheduling, paging, storage and the console.
pub struct Kernel {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) vmm: Arc<dyn Vmm>,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) console: Arc<dyn Console>,
    pub(crate) timer: Timer,
    pub(crate) processes: ProcessTable,
}

impl Kernel {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        vmm: Arc<dyn Vmm>,
        fs: Arc<dyn FileSystem>,
        console: Arc<dyn Console>,
    ) -> Self {
        log_info!("kernel: user programs on '{}'", fs.name());
        Kernel {
            scheduler,
            vmm,
            fs,
            console,
            timer: Timer::new(),
            processes: ProcessTable::new(),
        }
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }
}
