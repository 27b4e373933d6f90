//! # Reader Spin Policy
//!
//! A reader whose cursor has passed the `safe_end` hint must wait for the
//! writer-count to reach zero before it can trust the write-index. That wait
//! is a spin: the hot path never touches a kernel wait object. This module
//! configures how the spin behaves and when, if ever, it gives up.

use std::time::Duration;

/// Controls the quiescence spin in `Page::pop`.
///
/// The default spins forever, yielding to the scheduler between attempts; a
/// stalled writer then stalls every reader past the hint. Bounding the spin
/// (by iterations, wall-clock deadline, or both) makes `pop` surface
/// `PopResult::TimedOut` instead, leaving the cursor untouched so the caller
/// can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPolicy {
    /// Yield to the OS scheduler between state loads instead of issuing a
    /// CPU spin hint. Yielding is kinder on shared cores; the busy hint is
    /// lower latency when reader and writer each own one.
    pub spin_yield: bool,
    /// Give up after this many state loads. `None` spins forever.
    pub max_spin_iters: Option<u64>,
    /// Give up once this much wall-clock time has elapsed. `None` never does.
    pub deadline: Option<Duration>,
}

impl SpinPolicy {
    /// Spin forever, yielding cooperatively.
    pub const fn unbounded() -> Self {
        Self {
            spin_yield: true,
            max_spin_iters: None,
            deadline: None,
        }
    }

    pub const fn bounded(max_spin_iters: u64) -> Self {
        Self {
            spin_yield: true,
            max_spin_iters: Some(max_spin_iters),
            deadline: None,
        }
    }

    pub const fn with_deadline(deadline: Duration) -> Self {
        Self {
            spin_yield: true,
            max_spin_iters: None,
            deadline: Some(deadline),
        }
    }
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unbounded_yielding() {
        let policy = SpinPolicy::default();
        assert!(policy.spin_yield);
        assert_eq!(policy.max_spin_iters, None);
        assert_eq!(policy.deadline, None);
    }

    #[test]
    fn constructors_set_single_bound() {
        assert_eq!(SpinPolicy::bounded(64).max_spin_iters, Some(64));
        assert_eq!(
            SpinPolicy::with_deadline(Duration::from_millis(5)).deadline,
            Some(Duration::from_millis(5))
        );
    }
}
