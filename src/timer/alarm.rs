use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::process::ProcessId;
use crate::scheduler::Signal;

/// Stable name of a queued alarm. Ordering by `(wake_up, seq)` is the
/// queue order: earliest first, insertion order among equals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AlarmHandle {
    wake_up: u64,
    seq: u64,
}

impl AlarmHandle {
    pub fn wake_up(&self) -> u64 {
        self.wake_up
    }
}

/// A pending wake-up for one sleeping thread.
#[derive(Debug)]
pub struct Alarm {
    pub owner: ProcessId,
    pub signal: Arc<Signal>,
}

/// Alarms sorted by wake-up tick. An alarm is present exactly while its
/// owner is blocked on it; the tick handler or `cancel` takes it out.
#[derive(Debug)]
pub struct SleepQueue {
    alarms: BTreeMap<AlarmHandle, Alarm>,
    next_seq: u64,
}

impl SleepQueue {
    pub const fn new() -> Self {
        SleepQueue {
            alarms: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn insert(&mut self, wake_up: u64, owner: ProcessId) -> (AlarmHandle, Arc<Signal>) {
        let handle = AlarmHandle {
            wake_up,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let signal = Arc::new(Signal::new(owner));
        self.alarms.insert(
            handle,
            Alarm {
                owner,
                signal: Arc::clone(&signal),
            },
        );
        (handle, signal)
    }

    /// Unlink an alarm without firing it. Returns whether it was queued.
    pub fn cancel(&mut self, handle: AlarmHandle) -> bool {
        self.alarms.remove(&handle).is_some()
    }

    /// Remove the earliest alarm if it is due at `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<Alarm> {
        let (&handle, _) = self.alarms.first_key_value()?;
        if handle.wake_up > now {
            return None;
        }
        self.alarms.remove(&handle)
    }

    pub fn next_wake_up(&self) -> Option<u64> {
        self.alarms.keys().next().map(|handle| handle.wake_up)
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}
