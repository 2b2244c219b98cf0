//! Atomic version counter for optimistic concurrency control
//!
//! Even values are stable, odd values mark a write in progress. Writers
//! enter with a compare-and-swap so that two writers never interleave on
//! one counter; readers never write and retry within a budget.
//!
//! Payload words guarded by a counter must themselves be atomics accessed
//! with `Relaxed` ordering. The fences here order them against the counter.

use std::sync::atomic::{AtomicU64, Ordering, fence};

/// Spins before a waiting reader or writer starts yielding the CPU.
const SPIN_LIMIT: u32 = 16;

/// Version counter using even/odd optimistic versioning
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct VersionCounter {
    counter: AtomicU64,
}

impl VersionCounter {
    /// Create a new version counter starting at 0 (even)
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Get current version with acquire ordering
    #[inline]
    pub fn load(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Reset to a stable value. Only valid while no other party can access
    /// the guarded data.
    #[inline]
    pub fn reset(&self, value: u64) {
        debug_assert!(Self::is_stable(value));
        self.counter.store(value, Ordering::Release);
    }

    /// Try once to move a stable version to odd.
    ///
    /// Returns the odd version on success.
    #[inline]
    pub fn try_begin_write(&self) -> Option<u64> {
        let current = self.counter.load(Ordering::Relaxed);
        if Self::is_writing(current) {
            return None;
        }
        self.counter
            .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        fence(Ordering::Release);
        Some(current + 1)
    }

    /// Begin write operation, retrying up to `budget` times
    pub fn begin_write(&self, budget: u32) -> Option<u64> {
        for attempt in 0..budget.max(1) {
            if let Some(odd) = self.try_begin_write() {
                return Some(odd);
            }
            backoff(attempt);
        }
        None
    }

    /// Complete write operation started at `odd`
    #[inline]
    pub fn end_write(&self, odd: u64) {
        debug_assert!(Self::is_writing(odd));
        self.counter.store(odd + 1, Ordering::Release);
    }

    /// Close a write section whose writer is gone.
    ///
    /// Only succeeds while the counter still reads `odd`, so a section that
    /// ended or was replaced in the meantime is left alone.
    #[inline]
    pub fn abandon_write(&self, odd: u64) -> bool {
        Self::is_writing(odd)
            && self
                .counter
                .compare_exchange(odd, odd + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    /// Run `f` until it observes a stable snapshot, at most `budget` times.
    ///
    /// Returns the snapshot and the version it was taken at.
    #[inline]
    pub fn read<T>(&self, budget: u32, mut f: impl FnMut() -> T) -> Option<(T, u64)> {
        for attempt in 0..budget.max(1) {
            let before = self.counter.load(Ordering::Acquire);
            if Self::is_stable(before) {
                let out = f();
                fence(Ordering::Acquire);
                let after = self.counter.load(Ordering::Relaxed);
                if before == after {
                    return Some((out, before));
                }
            }
            backoff(attempt);
        }
        None
    }

    /// Check if version is stable (even)
    #[inline]
    pub const fn is_stable(version: u64) -> bool {
        version % 2 == 0
    }

    /// Check if version indicates write in progress (odd)
    #[inline]
    pub const fn is_writing(version: u64) -> bool {
        version % 2 == 1
    }
}

#[inline]
fn backoff(attempt: u32) {
    if attempt < SPIN_LIMIT {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}
