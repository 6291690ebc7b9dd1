//! Global tick counter and the sleep queue it drives.

pub mod alarm;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::arch;
use crate::kernel::Kernel;
use crate::process::ProcessId;
use crate::scheduler::{Scheduler, Signal};

pub use alarm::{Alarm, AlarmHandle, SleepQueue};

/// Timer interrupts per second.
pub const TIMER_FREQ: i64 = 100;

pub struct Timer {
    ticks: AtomicU64,
    queue: Mutex<SleepQueue>,
}

impl Timer {
    pub const fn new() -> Self {
        Timer {
            ticks: AtomicU64::new(0),
            queue: Mutex::new(SleepQueue::new()),
        }
    }

    /// Ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self, then: u64) -> u64 {
        self.ticks().saturating_sub(then)
    }

    /// Number of threads currently asleep.
    pub fn pending(&self) -> usize {
        arch::without_interrupts(|| self.queue.lock().len())
    }

    /// Queue an alarm for `owner` due `ticks` ticks from now.
    pub fn arm(&self, owner: ProcessId, ticks: u64) -> (AlarmHandle, Arc<Signal>) {
        arch::without_interrupts(|| {
            let wake_up = self.ticks().saturating_add(ticks);
            self.queue.lock().insert(wake_up, owner)
        })
    }

    /// Unlink an alarm that will never be waited on.
    pub fn cancel(&self, handle: AlarmHandle) -> bool {
        arch::without_interrupts(|| self.queue.lock().cancel(handle))
    }

    /// Block the current thread for at least `ticks` ticks.
    pub fn alarm_set(&self, sched: &dyn Scheduler, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        let (_, signal) = self.arm(sched.current(), ticks as u64);
        signal.wait(sched);
    }

    /// Advance the clock by one tick and release every alarm now due.
    /// Runs in interrupt context; never blocks.
    pub fn tick(&self, sched: &dyn Scheduler) -> usize {
        let now = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let mut woken = 0;
        // The queue lock covers each removal only, not the unblock.
        while let Some(alarm) = self.pop_due(now) {
            alarm.signal.notify(sched);
            woken += 1;
        }
        woken
    }

    fn pop_due(&self, now: u64) -> Option<Alarm> {
        self.queue.lock().pop_due(now)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert `amount` units of `1 / per_second` seconds into whole ticks,
/// rounding down but never below one tick. Non-positive amounts give 0.
pub fn to_ticks(amount: i64, per_second: i64) -> i64 {
    if amount <= 0 {
        return 0;
    }
    let ticks = i128::from(amount) * i128::from(TIMER_FREQ) / i128::from(per_second);
    ticks.clamp(1, i128::from(i64::MAX)) as i64
}

impl Kernel {
    /// Called once per timer interrupt.
    pub fn timer_interrupt(&self) {
        self.timer.tick(self.scheduler.as_ref());
    }

    /// Suspend the current process for `ticks` timer ticks.
    pub fn sleep(&self, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        let sched = self.scheduler.as_ref();
        let pid = sched.current();
        let (handle, signal) = self.timer.arm(pid, ticks as u64);

        let process = self.processes.get(pid);
        if let Some(process) = &process {
            process.set_alarm(Some(handle));
        }
        signal.wait(sched);
        if let Some(process) = &process {
            process.set_alarm(None);
        }
    }

    pub fn msleep(&self, ms: i64) {
        self.sleep(to_ticks(ms, 1_000));
    }

    pub fn usleep(&self, us: i64) {
        self.sleep(to_ticks(us, 1_000_000));
    }

    pub fn nsleep(&self, ns: i64) {
        self.sleep(to_ticks(ns, 1_000_000_000));
    }
}
