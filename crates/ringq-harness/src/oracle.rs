//! Structural invariant checks.
//!
//! The oracle never trusts an operation's own result: it re-derives what it
//! can from the queue (circularity, size, ordering) and compares against
//! expectations maintained by the runner. A violated invariant is a scored
//! failure, not an exception; the engine under test is left untouched.

use ringq_core::{ExecGuard, Queue, Trap};

/// Running pass/fail tally for one harness run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Scorecard {
    pub passed: u64,
    pub failed: u64,
}

impl Scorecard {
    pub fn pass(&mut self) {
        self.passed += 1;
    }

    pub fn fail(&mut self) {
        self.failed += 1;
    }

    /// Verdict: true when nothing failed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Whether payloads are in ascending byte-wise order, head to tail.
pub fn is_ascending(q: &Queue, guard: &ExecGuard) -> Result<bool, Trap> {
    let mut prev: Option<&str> = None;
    for text in q.texts() {
        guard.tick()?;
        if let Some(p) = prev {
            if p > text {
                return Ok(false);
            }
        }
        prev = Some(text);
    }
    Ok(true)
}

/// Whether any two adjacent payloads compare equal. After a dedup on a
/// sorted queue this must be false.
pub fn has_adjacent_duplicates(q: &Queue, guard: &ExecGuard) -> Result<bool, Trap> {
    let mut prev: Option<&str> = None;
    for text in q.texts() {
        guard.tick()?;
        if prev == Some(text) {
            return Ok(true);
        }
        prev = Some(text);
    }
    Ok(false)
}
