//! Allocation fault injector.
//!
//! The queue engine never touches a real allocator for its bookkeeping;
//! it asks a [`FaultAllocator`] for logical grants and releases them when
//! an element dies. That indirection is what makes partial-failure paths
//! testable: the injector can be told to deny the Nth future grant, or to
//! deny grants probabilistically, and it keeps a registry of every
//! outstanding grant so a harness can assert zero leaks after teardown and
//! catch double-release or foreign-release without crashing.
//!
//! The injector is passed explicitly into queue operations. There is no
//! process-wide override and no global mutable state; a test owns its
//! injector and its verdict.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Logical allocation id. Ids are granted from a monotonically increasing
/// offset and are never reused, so a released id can always be told apart
/// from one that was never granted.
pub type AllocId = usize;

/// First offset handed out. The low range is left unused so that small
/// integers in tests never collide with real grants.
const BASE_OFFSET: AllocId = 0x1000;

#[derive(Debug, Clone)]
struct Grant {
    size: usize,
}

/// Severity of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One allocator lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocEvent {
    /// Monotonic event id.
    pub seq: u64,
    /// Severity level.
    pub level: EventLevel,
    /// Event kind (`grant`, `release`, `fault_injected`, ...).
    pub event: &'static str,
    /// Grant id involved, when one exists.
    pub id: Option<AllocId>,
    /// Size involved, when one exists.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: outstanding grants after the event.
    pub outstanding: usize,
}

/// Allocation facade with deterministic fault injection and leak tracking.
pub struct FaultAllocator {
    /// Outstanding grants (id -> record).
    active: HashMap<AllocId, Grant>,
    /// Released ids, kept to tell double-release from foreign-release.
    recently_released: HashSet<AllocId>,
    /// Next offset for fresh grants.
    next_offset: AllocId,
    /// Total grant calls observed, successful or not.
    alloc_calls: u64,
    /// When `Some(n)`, the nth upcoming grant call fails (1-indexed),
    /// then the countdown disarms.
    fail_countdown: Option<u64>,
    /// Independent per-grant failure probability, in percent.
    fail_probability: u8,
    /// RNG for the probabilistic path, explicitly seeded.
    rng: ChaCha20Rng,
    /// Double-release / foreign-release tally.
    violations: u64,
    /// When false, release anomalies are logged at Debug instead of Warn,
    /// so a bulk teardown of a known-damaged queue does not cascade.
    cautious: bool,
    /// Total bytes currently granted.
    total_bytes: usize,
    /// Lifecycle event log.
    events: Vec<AllocEvent>,
    next_seq: u64,
}

impl FaultAllocator {
    /// Creates an injector with no faults configured. The seed drives only
    /// the probabilistic-failure path; countdown failures are exact.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            active: HashMap::new(),
            recently_released: HashSet::new(),
            next_offset: BASE_OFFSET,
            alloc_calls: 0,
            fail_countdown: None,
            fail_probability: 0,
            rng: ChaCha20Rng::seed_from_u64(seed),
            violations: 0,
            cautious: true,
            total_bytes: 0,
            events: Vec::new(),
            next_seq: 1,
        }
    }

    /// Arms the countdown: the `n`th subsequent grant call fails, after
    /// which the countdown disarms until re-armed. `fail_after(0)` cancels
    /// an armed countdown.
    pub fn fail_after(&mut self, n: u64) {
        if n == 0 {
            self.fail_countdown = None;
            self.record(
                EventLevel::Info,
                "fail_after_cancelled",
                None,
                None,
                "configured",
                String::new(),
            );
            return;
        }
        self.fail_countdown = Some(n);
        self.record(
            EventLevel::Info,
            "fail_after_armed",
            None,
            None,
            "configured",
            format!("n={n}"),
        );
    }

    /// Sets the independent per-grant failure probability in percent,
    /// clamped to 100.
    pub fn fail_probability(&mut self, pct: u8) {
        self.fail_probability = pct.min(100);
        self.record(
            EventLevel::Info,
            "fail_probability_set",
            None,
            None,
            "configured",
            format!("pct={}", self.fail_probability),
        );
    }

    /// Toggles cautious diagnostics. See the field note; the registry keeps
    /// counting violations either way.
    pub fn set_cautious(&mut self, cautious: bool) {
        self.cautious = cautious;
    }

    /// Requests a grant of `size` bytes. Returns the fresh id, or `None`
    /// when a configured fault fires (or the offset space is exhausted).
    pub fn alloc(&mut self, size: usize) -> Option<AllocId> {
        self.alloc_calls += 1;

        if let Some(left) = self.fail_countdown {
            if left <= 1 {
                self.fail_countdown = None;
                self.record(
                    EventLevel::Warn,
                    "fault_injected",
                    None,
                    Some(size),
                    "denied",
                    "fail_after countdown fired".to_string(),
                );
                return None;
            }
            self.fail_countdown = Some(left - 1);
        }

        if self.fail_probability > 0
            && self.rng.gen_range(0..100u32) < u32::from(self.fail_probability)
        {
            self.record(
                EventLevel::Warn,
                "fault_injected",
                None,
                Some(size),
                "denied",
                format!("probabilistic failure at {}%", self.fail_probability),
            );
            return None;
        }

        let size = size.max(1);
        let id = self.next_offset;
        let Some(next_offset) = self.next_offset.checked_add(size) else {
            self.record(
                EventLevel::Info,
                "offset_overflow",
                None,
                Some(size),
                "denied",
                format!("next_offset={}", self.next_offset),
            );
            return None;
        };
        self.next_offset = next_offset;
        self.active.insert(id, Grant { size });
        self.total_bytes += size;
        self.record(
            EventLevel::Trace,
            "grant",
            Some(id),
            Some(size),
            "success",
            String::new(),
        );
        Some(id)
    }

    /// Releases a grant. A release of an id that is not outstanding is
    /// reported and tallied, never fatal: an id seen before counts as a
    /// double-release, an id never granted as a foreign release.
    pub fn release(&mut self, id: AllocId) {
        match self.active.remove(&id) {
            Some(grant) => {
                self.total_bytes = self.total_bytes.saturating_sub(grant.size);
                self.recently_released.insert(id);
                self.record(
                    EventLevel::Trace,
                    "release",
                    Some(id),
                    Some(grant.size),
                    "success",
                    String::new(),
                );
            }
            None => {
                self.violations += 1;
                let level = if self.cautious {
                    EventLevel::Warn
                } else {
                    EventLevel::Debug
                };
                if self.recently_released.contains(&id) {
                    self.record(
                        level,
                        "double_release",
                        Some(id),
                        None,
                        "rejected",
                        "id was already released".to_string(),
                    );
                } else {
                    self.record(
                        level,
                        "foreign_release",
                        Some(id),
                        None,
                        "rejected",
                        "id was never granted".to_string(),
                    );
                }
            }
        }
    }

    /// Number of grants currently outstanding.
    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.active.len()
    }

    /// Bytes currently outstanding.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Total grant calls observed, including denied ones.
    #[must_use]
    pub fn alloc_calls(&self) -> u64 {
        self.alloc_calls
    }

    /// Double-release / foreign-release tally.
    #[must_use]
    pub fn violation_count(&self) -> u64 {
        self.violations
    }

    /// Returns a view of the lifecycle event log.
    #[must_use]
    pub fn events(&self) -> &[AllocEvent] {
        &self.events
    }

    /// Drains the lifecycle event log.
    pub fn drain_events(&mut self) -> Vec<AllocEvent> {
        std::mem::take(&mut self.events)
    }

    fn record(
        &mut self,
        level: EventLevel,
        event: &'static str,
        id: Option<AllocId>,
        size: Option<usize>,
        outcome: &'static str,
        details: String,
    ) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.events.push(AllocEvent {
            seq,
            level,
            event,
            id,
            size,
            outcome,
            details,
            outstanding: self.active.len(),
        });
    }
}

impl Default for FaultAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}
