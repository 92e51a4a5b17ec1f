//! Process-wide streak of qualifying sessions.
//!
//! One counter outlives every session in the process. It is only touched
//! when a session ends, and each update is a single atomic step so sessions
//! ending at the same time cannot lose an increment or a reset.

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

lazy_static! {
    static ref GLOBAL_COUNTER: Arc<QualificationCounter> = Arc::new(QualificationCounter::new());
}

#[derive(Debug, Default)]
pub struct QualificationCounter {
    streak: AtomicU32,
}

impl QualificationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter shared by every session in this process
    pub fn global() -> Arc<QualificationCounter> {
        Arc::clone(&GLOBAL_COUNTER)
    }

    pub fn read(&self) -> u32 {
        self.streak.load(Ordering::SeqCst)
    }

    /// Extend the streak on a qualifying session, break it otherwise.
    /// Returns the new value.
    pub fn record_outcome(&self, qualified: bool) -> u32 {
        if qualified {
            let previous = self
                .streak
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    Some(n.saturating_add(1))
                })
                .unwrap_or_else(|n| n);
            previous.saturating_add(1)
        } else {
            self.streak.store(0, Ordering::SeqCst);
            0
        }
    }

    pub fn reset(&self) {
        self.streak.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_streak_increments_and_resets() {
        let counter = QualificationCounter::new();
        assert_eq!(counter.read(), 0);
        assert_eq!(counter.record_outcome(true), 1);
        assert_eq!(counter.record_outcome(true), 2);
        assert_eq!(counter.record_outcome(false), 0);
        assert_eq!(counter.read(), 0);
        assert_eq!(counter.record_outcome(true), 1);
    }

    #[test]
    fn test_streak_saturates() {
        let counter = QualificationCounter::new();
        counter.streak.store(u32::MAX, Ordering::SeqCst);
        assert_eq!(counter.record_outcome(true), u32::MAX);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let counter = Arc::new(QualificationCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..100 {
                        counter.record_outcome(true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.read(), 800);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(
            &QualificationCounter::global(),
            &QualificationCounter::global()
        ));
    }
}
