//! Worker slot accounting for one dispatch.
//!
//! The pool reserves a slot before starting a job and the guard returns it
//! when the job finishes, so `in_use` never exceeds `capacity`. The highest
//! value ever observed is kept for reporting and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct WorkerSlots {
    capacity: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl WorkerSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Highest number of slots held at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use())
    }

    /// Take one slot if any is free. The slot is released when the guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return None;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(current + 1, Ordering::AcqRel);
                    return Some(SlotGuard {
                        slots: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Holds one slot of a [`WorkerSlots`].
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<WorkerSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let slots = Arc::new(WorkerSlots::new(2));
        assert_eq!(slots.available(), 2);
        let a = slots.try_acquire().unwrap();
        let b = slots.try_acquire().unwrap();
        assert!(slots.try_acquire().is_none());
        assert_eq!(slots.in_use(), 2);
        drop(a);
        assert_eq!(slots.available(), 1);
        let _c = slots.try_acquire().unwrap();
        drop(b);
        assert_eq!(slots.in_use(), 1);
        assert_eq!(slots.peak(), 2);
    }

    #[test]
    fn zero_capacity_is_one() {
        let slots = Arc::new(WorkerSlots::new(0));
        assert_eq!(slots.capacity(), 1);
        assert!(slots.try_acquire().is_some());
    }
}
