use crate::host::{HostState, ThreadHandle};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerEntry {
    pub thread: ThreadHandle,
    /// Absolute expiry in milliseconds.
    pub expire: f64,
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerDrain {
    pub resumed: usize,
    pub discarded: usize,
}

impl TimerDrain {
    pub fn processed(&self) -> usize {
        self.resumed + self.discarded
    }
}

/// Delayed resumptions of suspended host threads, kept in expiry order.
#[derive(Debug, Default)]
pub struct ThreadScheduler {
    queue: VecDeque<TimerEntry>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a reference to `thread` and resume it `delay_ms` after `now`.
    /// Entries with equal expiry resume in push order.
    pub fn push_thread(&mut self, host: &mut dyn HostState, thread: ThreadHandle, delay_ms: f64, now: f64) {
        host.retain_thread(thread);
        let expire = now + delay_ms.max(0.0);
        let index = self.queue.partition_point(|entry| entry.expire <= expire);
        self.queue.insert(index, TimerEntry { thread, expire });
        log::debug!("[timer] thread {} resumes at {expire:.0}ms", thread.0);
    }

    /// Process every entry due at `now`. A thread whose only remaining reference is ours was
    /// abandoned by the host and is released without resuming.
    pub fn drain_due(&mut self, host: &mut dyn HostState, now: f64) -> TimerDrain {
        let mut drain = TimerDrain::default();
        while self.queue.front().map_or(false, |entry| entry.expire <= now) {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            if host.thread_ref_count(entry.thread) <= 1 {
                host.release_thread(entry.thread);
                drain.discarded += 1;
                log::debug!("[timer] thread {} abandoned, released", entry.thread.0);
            } else {
                host.release_thread(entry.thread);
                host.schedule_runnable(entry.thread);
                drain.resumed += 1;
            }
        }
        drain
    }

    pub fn next_expiry(&self) -> Option<f64> {
        self.queue.front().map(|entry| entry.expire)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TimerEntry> {
        self.queue.iter()
    }
}
