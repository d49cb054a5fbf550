use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Sliding-window event counter shared across concurrent analyses.
///
/// Each key owns its own deque behind a DashMap shard lock, so checks and
/// records for one key are atomic with respect to each other.
#[derive(Debug, Default)]
pub struct SlidingWindowCounter {
    events: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl SlidingWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events recorded for `key` within `window` before `now`.
    pub fn count(&self, key: &str, window: Duration, now: DateTime<Utc>) -> usize {
        let remaining = match self.events.get_mut(key) {
            Some(mut entry) => {
                prune(&mut entry, window, now);
                entry.len()
            }
            None => return 0,
        };
        if remaining == 0 {
            self.events.remove_if(key, |_, events| events.is_empty());
        }
        remaining
    }

    pub fn is_exhausted(&self, key: &str, max: u32, window: Duration, now: DateTime<Utc>) -> bool {
        self.count(key, window, now) >= max as usize
    }

    /// Records an event unconditionally, dropping entries older than `window`.
    pub fn record(&self, key: &str, window: Duration, at: DateTime<Utc>) {
        let mut entry = self.events.entry(key.to_string()).or_default();
        prune(&mut entry, window, at);
        entry.push_back(at);
    }

    /// Records an event only if the key still has room; returns whether it did.
    pub fn try_acquire(&self, key: &str, max: u32, window: Duration, now: DateTime<Utc>) -> bool {
        let acquired = {
            let mut entry = self.events.entry(key.to_string()).or_default();
            prune(&mut entry, window, now);
            if entry.len() < max as usize {
                entry.push_back(now);
                true
            } else {
                false
            }
        };
        if !acquired {
            self.events.remove_if(key, |_, events| events.is_empty());
        }
        acquired
    }

    /// Takes back an event previously recorded at `at`.
    pub fn release(&self, key: &str, at: DateTime<Utc>) {
        let emptied = match self.events.get_mut(key) {
            Some(mut entry) => {
                if let Some(position) = entry.iter().rposition(|t| *t == at) {
                    entry.remove(position);
                }
                entry.is_empty()
            }
            None => false,
        };
        if emptied {
            self.events.remove_if(key, |_, events| events.is_empty());
        }
    }

    /// Prunes every key against `window` and forgets keys left empty.
    pub fn sweep(&self, window: Duration, now: DateTime<Utc>) {
        self.events.retain(|_, events| {
            prune(events, window, now);
            !events.is_empty()
        });
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.events.len()
    }
}

fn prune(events: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    while let Some(oldest) = events.front() {
        if now - *oldest >= window {
            events.pop_front();
        } else {
            break;
        }
    }
}
