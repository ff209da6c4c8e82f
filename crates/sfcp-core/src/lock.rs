//! Critical-section abstraction guarding the engine's shared singletons
//! (spec.md §5, §9).
//!
//! On a uniprocessor MCU this is "disable interrupts for the duration of
//! `f`"; on a larger core with a real scheduler it is a mutex. Exactly one
//! inner state struct lives behind one [`CriticalSection`], so the "only
//! one mutator active at a time" invariant holds structurally rather than
//! by convention across several independently-locked fields.

use std::sync::Mutex;

/// A region in which at most one execution context may run at a time.
pub trait CriticalSection<T>: Send + Sync {
    /// Run `f` with exclusive access to the guarded value.
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

/// Default [`CriticalSection`] backed by [`std::sync::Mutex`].
///
/// Stands in for "disable interrupts" in this workspace's host-side
/// simulation; a bare-metal platform would provide an implementation that
/// masks the relevant IRQ lines instead of blocking.
pub struct MutexCriticalSection<T> {
    inner: Mutex<T>,
}

impl<T> MutexCriticalSection<T> {
    /// Wrap `value` behind a new critical section.
    pub const fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }
}

impl<T: Send> CriticalSection<T> for MutexCriticalSection<T> {
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn with_grants_exclusive_mutable_access() {
        let cs = MutexCriticalSection::new(0u32);
        cs.with(|v| *v += 1);
        cs.with(|v| *v += 1);
        assert_eq!(cs.with(|v| *v), 2);
    }
}
