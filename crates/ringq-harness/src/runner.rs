//! Command runner.
//!
//! Drives queue-engine operations from a parsed script, bracketing every
//! traversal-shaped operation between checkpoint arm/disarm so a watchdog
//! expiry is observed as a scored operation failure, never a crash.
//!
//! Failure accounting follows the injector's split: an allocation denial
//! is an expected, tolerated failure (up to the configured budget) — the
//! run stays clean as long as the engine reported it honestly and the
//! structure checks still pass. A value mismatch, a broken invariant, a
//! trap, or a leak at teardown is a hard failure and loses the verdict.

use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use ringq_core::{ExecGuard, FaultAllocator, Queue, Trap};

use crate::command::{Command, parse_line};
use crate::oracle::{self, Scorecard};
use crate::report::{LogLevel, Outcome, Reporter};

const RAND_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const MIN_RAND_LEN: usize = 5;
const MAX_RAND_LEN: usize = 10;

/// Tunable parameters for one run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Seed for the run RNG (RAND payloads and shuffle draws) and the
    /// injector's probabilistic path.
    pub seed: u64,
    /// Watchdog budget per guarded operation.
    pub time_limit: Duration,
    /// How many tolerated operation failures before the run is abandoned.
    pub fail_limit: u64,
    /// Queue size above which teardown runs with cautious diagnostics off.
    pub big_queue: usize,
    /// Upper bound for displayed/copied payload bytes.
    pub max_string: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            time_limit: Duration::from_secs(1),
            fail_limit: 30,
            big_queue: 30,
            max_string: 1024,
        }
    }
}

/// Drives engine operations and scores them against the oracle.
pub struct CommandRunner {
    config: RunnerConfig,
    reporter: Reporter,
    alloc: FaultAllocator,
    guard: ExecGuard,
    rng: ChaCha20Rng,
    queue: Option<Queue>,
    expected_size: usize,
    fail_count: u64,
    score: Scorecard,
}

impl CommandRunner {
    #[must_use]
    pub fn new(config: RunnerConfig, reporter: Reporter) -> Self {
        let alloc = FaultAllocator::new(config.seed);
        let rng = ChaCha20Rng::seed_from_u64(config.seed ^ 0x9E37_79B9_7F4A_7C15);
        Self {
            config,
            reporter,
            alloc,
            guard: ExecGuard::new(),
            rng,
            queue: None,
            expected_size: 0,
            fail_count: 0,
            score: Scorecard::default(),
        }
    }

    /// Runs a whole script. Returns false if the run was abandoned early
    /// (failure budget exhausted); the verdict still comes from
    /// [`CommandRunner::finish`].
    pub fn run_script(&mut self, text: &str) -> bool {
        for (lineno, raw) in text.lines().enumerate() {
            match parse_line(raw) {
                Ok(Some(cmd)) => {
                    if !self.dispatch(cmd) {
                        return false;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.hard_failure(&format!("line {}: {err}", lineno + 1));
                }
            }
        }
        true
    }

    /// Parses and runs one line.
    pub fn run_line(&mut self, line: &str) -> bool {
        match parse_line(line) {
            Ok(Some(cmd)) => self.dispatch(cmd),
            Ok(None) => true,
            Err(err) => self.hard_failure(&err.to_string()),
        }
    }

    /// Frees any live queue, checks the injector's books, and returns the
    /// run verdict.
    pub fn finish(&mut self) -> bool {
        if self.queue.is_some() {
            self.cmd_free();
        }
        let leaked = self.alloc.outstanding_count();
        if leaked > 0 {
            self.reporter.record(
                "leak_check",
                Outcome::Fail,
                Some(format!("{leaked} blocks still allocated")),
            );
            self.score.fail();
        } else {
            self.reporter.record("leak_check", Outcome::Pass, None);
            self.score.pass();
        }
        let violations = self.alloc.violation_count();
        if violations > 0 {
            self.hard_failure(&format!("{violations} release violations recorded"));
        }
        self.reporter.flush();
        self.verdict()
    }

    /// Current verdict: no hard failures so far.
    #[must_use]
    pub fn verdict(&self) -> bool {
        self.score.all_passed()
    }

    #[must_use]
    pub fn scorecard(&self) -> Scorecard {
        self.score
    }

    #[must_use]
    pub fn allocator(&self) -> &FaultAllocator {
        &self.alloc
    }

    #[must_use]
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    fn dispatch(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::New => self.cmd_new(),
            Command::Free => self.cmd_free(),
            Command::InsertHead { text, count } => self.cmd_insert(&text, count, true),
            Command::InsertTail { text, count } => self.cmd_insert(&text, count, false),
            Command::RemoveHead { expected } => self.cmd_remove(true, expected.as_deref(), false),
            Command::RemoveTail { expected } => self.cmd_remove(false, expected.as_deref(), false),
            Command::RemoveHeadQuiet => self.cmd_remove(true, None, true),
            Command::Reverse => self.cmd_reverse(),
            Command::Sort => self.cmd_sort(),
            Command::Dedup => self.cmd_dedup(),
            Command::DeleteMiddle => self.cmd_delete_middle(),
            Command::SwapPairs => self.cmd_swap_pairs(),
            Command::Shuffle => self.cmd_shuffle(),
            Command::Size { count } => self.cmd_size(count),
            Command::Show => self.cmd_show(),
            Command::Param { name, value } => self.cmd_param(&name, value),
        }
    }

    // -----------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------

    fn cmd_new(&mut self) -> bool {
        if self.queue.is_some() {
            self.reporter
                .report(LogLevel::Warn, "freeing the old queue first");
            if !self.cmd_free() {
                return false;
            }
        }
        match Queue::new(&mut self.alloc) {
            Some(q) => {
                self.queue = Some(q);
                self.expected_size = 0;
                self.score.pass();
                true
            }
            None => self.tolerated_failure("could not allocate a new queue"),
        }
    }

    fn cmd_free(&mut self) -> bool {
        let Some(queue) = self.queue.take() else {
            // Freeing an absent queue is a no-op.
            self.reporter.report(LogLevel::Debug, "free: no queue");
            return true;
        };
        self.reporter.report(LogLevel::Debug, "freeing queue");
        let big = self.expected_size > self.config.big_queue;
        if big {
            self.alloc.set_cautious(false);
        }
        let outcome = match self.guard.arm(self.config.time_limit) {
            Ok(()) => {
                let out = queue.free(&mut self.alloc, &self.guard);
                self.guard.disarm();
                out
            }
            Err(err) => Err(Trap::Interrupted(err.to_string())),
        };
        self.alloc.set_cautious(true);
        self.expected_size = 0;
        match outcome {
            Ok(()) => {
                self.score.pass();
                true
            }
            Err(trap) => self.trap_failure("free", &trap),
        }
    }

    fn cmd_insert(&mut self, text: &str, count: usize, at_head: bool) -> bool {
        let event = if at_head { "ih" } else { "it" };
        if self.queue.is_none() {
            return self.hard_failure(&format!("{event}: no queue"));
        }
        for _ in 0..count {
            let value = if text == "RAND" {
                random_text(&mut self.rng)
            } else {
                text.to_string()
            };
            let inserted = match self.queue.as_mut() {
                Some(q) if at_head => q.insert_head(&mut self.alloc, &value),
                Some(q) => q.insert_tail(&mut self.alloc, &value),
                None => false,
            };
            if inserted {
                self.expected_size += 1;
            } else {
                if !self.tolerated_failure(&format!("insert of \"{value}\" failed")) {
                    return false;
                }
                break;
            }
        }
        self.check_structure(event)
    }

    fn cmd_remove(&mut self, from_head: bool, expected: Option<&str>, quiet: bool) -> bool {
        let event = if from_head { "rh" } else { "rt" };
        let mut buf = vec![0u8; self.config.max_string.max(2)];
        let removed = match self.queue.as_mut() {
            Some(q) if from_head => q.remove_head(Some(&mut buf)),
            Some(q) => q.remove_tail(Some(&mut buf)),
            None => return self.hard_failure(&format!("{event}: no queue")),
        };
        let Some(removed) = removed else {
            return self.tolerated_failure(&format!("{event}: queue is empty"));
        };
        self.expected_size -= 1;
        let copied = text_until_nul(&buf);
        if !quiet {
            self.reporter
                .report(LogLevel::Info, &format!("removed \"{copied}\""));
        }
        let mut ok = true;
        if let Some(want) = expected {
            if copied == want {
                self.score.pass();
                self.reporter.record(event, Outcome::Pass, None);
            } else {
                ok = self.hard_failure(&format!(
                    "removed \"{copied}\" but expected \"{want}\""
                ));
            }
        }
        removed.release(&mut self.alloc);
        ok && self.check_structure(event)
    }

    fn cmd_reverse(&mut self) -> bool {
        let result = self.guarded(|queue, _alloc, _rng, guard| match queue {
            Some(q) => q.reverse(guard).map(|()| true),
            None => Ok(false),
        });
        match result {
            Ok(true) => self.check_structure("reverse"),
            Ok(false) => self.hard_failure("reverse: no queue"),
            Err(trap) => self.trap_failure("reverse", &trap),
        }
    }

    fn cmd_sort(&mut self) -> bool {
        let result = self.guarded(|queue, _alloc, _rng, guard| match queue {
            Some(q) => {
                q.sort(guard)?;
                oracle::is_ascending(q, guard).map(Some)
            }
            None => Ok(None),
        });
        match result {
            Ok(None) => self.hard_failure("sort: no queue"),
            Ok(Some(true)) => self.check_structure("sort"),
            Ok(Some(false)) => {
                self.reporter
                    .record("sort", Outcome::Fail, Some("not ascending".to_string()));
                self.hard_failure("sort: queue is not in ascending order")
            }
            Err(trap) => self.trap_failure("sort", &trap),
        }
    }

    fn cmd_dedup(&mut self) -> bool {
        let result = self.guarded(|queue, alloc, _rng, guard| match queue {
            Some(q) => {
                q.delete_duplicates(alloc, guard)?;
                let leftover_dups = oracle::has_adjacent_duplicates(q, guard)?;
                let size = q.size(guard)?;
                Ok(Some((leftover_dups, size)))
            }
            None => Ok(None),
        });
        match result {
            Ok(None) => self.hard_failure("dedup: no queue"),
            Ok(Some((false, size))) => {
                self.expected_size = size;
                self.check_structure("dedup")
            }
            Ok(Some((true, _))) => {
                self.reporter.record(
                    "dedup",
                    Outcome::Fail,
                    Some("adjacent duplicates remain".to_string()),
                );
                self.hard_failure("dedup: adjacent duplicates remain")
            }
            Err(trap) => self.trap_failure("dedup", &trap),
        }
    }

    fn cmd_delete_middle(&mut self) -> bool {
        let result = self.guarded(|queue, alloc, _rng, guard| match queue {
            Some(q) => q.delete_middle(alloc, guard).map(Some),
            None => Ok(None),
        });
        match result {
            Ok(None) => self.hard_failure("dm: no queue"),
            Ok(Some(true)) => {
                self.expected_size -= 1;
                self.check_structure("dm")
            }
            Ok(Some(false)) => self.tolerated_failure("dm: queue is empty"),
            Err(trap) => self.trap_failure("dm", &trap),
        }
    }

    fn cmd_swap_pairs(&mut self) -> bool {
        let result = self.guarded(|queue, _alloc, _rng, guard| match queue {
            Some(q) => q.swap_pairs(guard).map(|()| true),
            None => Ok(false),
        });
        match result {
            Ok(true) => self.check_structure("swap"),
            Ok(false) => self.hard_failure("swap: no queue"),
            Err(trap) => self.trap_failure("swap", &trap),
        }
    }

    fn cmd_shuffle(&mut self) -> bool {
        let result = self.guarded(|queue, _alloc, rng, guard| match queue {
            Some(q) => q.shuffle(rng, guard).map(|()| true),
            None => Ok(false),
        });
        match result {
            Ok(true) => self.check_structure("shuffle"),
            Ok(false) => self.hard_failure("shuffle: no queue"),
            Err(trap) => self.trap_failure("shuffle", &trap),
        }
    }

    fn cmd_size(&mut self, count: usize) -> bool {
        if self.queue.is_none() {
            return self.hard_failure("size: no queue");
        }
        let mut last = 0;
        for _ in 0..count.max(1) {
            let result =
                self.guarded(|queue, _alloc, _rng, guard| match queue {
                    Some(q) => q.size(guard),
                    None => Ok(0),
                });
            match result {
                Ok(n) => last = n,
                Err(trap) => return self.trap_failure("size", &trap),
            }
        }
        self.reporter
            .report(LogLevel::Info, &format!("queue size = {last}"));
        if last == self.expected_size {
            self.score.pass();
            self.reporter.record("size", Outcome::Pass, None);
            true
        } else {
            self.reporter.record(
                "size",
                Outcome::Fail,
                Some(format!("size {last} != expected {}", self.expected_size)),
            );
            self.hard_failure(&format!(
                "size {last} != expected {}",
                self.expected_size
            ))
        }
    }

    fn cmd_show(&mut self) -> bool {
        let line = match &self.queue {
            None => "q = NULL".to_string(),
            Some(q) => {
                let limit = self.config.big_queue;
                let cap = self.config.max_string;
                let mut shown: Vec<String> = Vec::new();
                let mut truncated = false;
                for (i, text) in q.texts().enumerate() {
                    if i >= limit {
                        truncated = true;
                        break;
                    }
                    shown.push(shorten(text, cap));
                }
                if truncated {
                    format!("q = [{} ...]", shown.join(" "))
                } else {
                    format!("q = [{}]", shown.join(" "))
                }
            }
        };
        self.reporter.report(LogLevel::Info, &line);
        true
    }

    fn cmd_param(&mut self, name: &str, value: i64) -> bool {
        if value < 0 {
            return self.hard_failure(&format!("option {name}: negative value"));
        }
        match name {
            "fail" => self.config.fail_limit = value as u64,
            "malloc" => {
                if value > 100 {
                    return self.hard_failure("option malloc: percentage above 100");
                }
                self.alloc.fail_probability(value as u8);
            }
            "failafter" => self.alloc.fail_after(value as u64),
            "length" => self.config.max_string = (value as usize).max(2),
            _ => return self.hard_failure(&format!("unknown option: {name}")),
        }
        self.reporter
            .report(LogLevel::Info, &format!("option {name} = {value}"));
        true
    }

    // -----------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------

    /// Runs `f` between checkpoint arm and disarm.
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(
            &mut Option<Queue>,
            &mut FaultAllocator,
            &mut ChaCha20Rng,
            &ExecGuard,
        ) -> Result<T, Trap>,
    ) -> Result<T, Trap> {
        if let Err(err) = self.guard.arm(self.config.time_limit) {
            return Err(Trap::Interrupted(err.to_string()));
        }
        let out = f(&mut self.queue, &mut self.alloc, &mut self.rng, &self.guard);
        self.guard.disarm();
        out
    }

    /// Structural post-check after a mutating command: the ring must be
    /// circular and the derived size must match the shadow.
    fn check_structure(&mut self, event: &str) -> bool {
        let expected = self.expected_size;
        let result = self.guarded(|queue, _alloc, _rng, guard| match queue {
            Some(q) => {
                let circular = q.is_circular(guard)?;
                let size = q.size(guard)?;
                Ok(Some((circular, size)))
            }
            None => Ok(None),
        });
        match result {
            Ok(None) => true,
            Ok(Some((true, size))) if size == expected => {
                self.score.pass();
                self.reporter.record(event, Outcome::Pass, None);
                true
            }
            Ok(Some((circular, size))) => {
                let detail = if circular {
                    format!("size {size} != expected {expected}")
                } else {
                    "ring is no longer circular".to_string()
                };
                self.reporter
                    .record(event, Outcome::Fail, Some(detail.clone()));
                self.hard_failure(&format!("{event}: {detail}"))
            }
            Err(trap) => self.trap_failure(event, &trap),
        }
    }

    /// An expected failure (denied grant, empty-queue removal). Within the
    /// budget the run stays clean; past it the run is abandoned.
    fn tolerated_failure(&mut self, msg: &str) -> bool {
        self.fail_count += 1;
        self.reporter.report(LogLevel::Warn, msg);
        if self.fail_count > self.config.fail_limit {
            self.hard_failure("exceeded the allowed operation-failure budget");
            false
        } else {
            true
        }
    }

    /// A failure that loses the verdict. The run continues so later
    /// commands can still surface diagnostics.
    fn hard_failure(&mut self, msg: &str) -> bool {
        self.score.fail();
        self.reporter.report(LogLevel::Error, msg);
        true
    }

    fn trap_failure(&mut self, event: &str, trap: &Trap) -> bool {
        let outcome = match trap {
            Trap::TimeLimit => Outcome::Timeout,
            Trap::Interrupted(_) => Outcome::Error,
        };
        self.reporter.record(event, outcome, Some(trap.to_string()));
        self.score.fail();
        true
    }
}

fn random_text(rng: &mut ChaCha20Rng) -> String {
    let len = rng.gen_range(MIN_RAND_LEN..=MAX_RAND_LEN);
    (0..len)
        .map(|_| RAND_CHARSET[rng.gen_range(0..RAND_CHARSET.len())] as char)
        .collect()
}

fn text_until_nul(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn shorten(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        let head: String = text.chars().take(cap).collect();
        format!("{head}...")
    }
}
