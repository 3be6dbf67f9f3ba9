//! Execution guard: checkpoint state machine plus watchdog timer.
//!
//! A guarded operation runs between [`ExecGuard::arm`] and
//! [`ExecGuard::disarm`]. Arming establishes the checkpoint and schedules
//! the watchdog; every traversal loop inside the engine polls
//! [`ExecGuard::tick`] once per step. When the watchdog deadline passes,
//! the timer thread sets a single-shot trip token and the next `tick`
//! returns a [`Trap`], which unwinds through `?` to whoever armed the
//! checkpoint. The runner observes the trap as an operation-level failure
//! with a cause, never as a crash.
//!
//! States: idle -> armed -> { completed (disarm) | trapped }. Only one
//! checkpoint may be armed at a time; arming while armed is an error.
//! Invalid-access trapping has no counterpart here: the engine contains no
//! unsafe code, so that fault class is structurally absent rather than
//! caught.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// A recoverable fault delivered to the armed checkpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Trap {
    /// The watchdog fired while the operation was still running.
    #[error("time limit exceeded: operation still running when the watchdog fired")]
    TimeLimit,
    /// Someone delivered an exception with a message while the checkpoint
    /// was armed.
    #[error("operation interrupted: {0}")]
    Interrupted(String),
}

/// Misuse of the checkpoint state machine.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    /// Operations are not reentrant with respect to fault recovery.
    #[error("a checkpoint is already armed")]
    AlreadyArmed,
    /// Exception delivery requires an armed checkpoint.
    #[error("no checkpoint is armed")]
    NotArmed,
}

enum TimerCmd {
    Idle,
    Watch { deadline: Instant, epoch: u64 },
    Shutdown,
}

struct TimerShared {
    cmd: Mutex<TimerCmd>,
    cv: Condvar,
    tripped: AtomicBool,
    cause: Mutex<Option<Trap>>,
}

/// Checkpoint slot plus its watchdog thread.
pub struct ExecGuard {
    shared: Arc<TimerShared>,
    handle: Option<JoinHandle<()>>,
    armed: bool,
    epoch: u64,
}

impl ExecGuard {
    /// Creates an idle guard and starts its watchdog thread.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            cmd: Mutex::new(TimerCmd::Idle),
            cv: Condvar::new(),
            tripped: AtomicBool::new(false),
            cause: Mutex::new(None),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("ringq-watchdog".to_string())
            .spawn(move || watchdog_loop(&thread_shared))
            .ok();
        Self {
            shared,
            handle,
            armed: false,
            epoch: 0,
        }
    }

    /// Arms the checkpoint with a deadline `limit` from now.
    pub fn arm(&mut self, limit: Duration) -> Result<(), GuardError> {
        if self.armed {
            return Err(GuardError::AlreadyArmed);
        }
        self.armed = true;
        self.epoch += 1;
        self.shared.tripped.store(false, Ordering::SeqCst);
        *self.shared.cause.lock() = None;
        *self.shared.cmd.lock() = TimerCmd::Watch {
            deadline: Instant::now() + limit,
            epoch: self.epoch,
        };
        self.shared.cv.notify_one();
        Ok(())
    }

    /// Clears the checkpoint after normal completion (or after observing a
    /// trap). Idempotent.
    pub fn disarm(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        self.epoch += 1;
        *self.shared.cmd.lock() = TimerCmd::Idle;
        self.shared.cv.notify_one();
        self.shared.tripped.store(false, Ordering::SeqCst);
        *self.shared.cause.lock() = None;
    }

    /// The cooperative checkpoint. `Ok` while idle or untripped; once the
    /// trip token is set, returns the pending cause.
    pub fn tick(&self) -> Result<(), Trap> {
        if !self.armed || !self.shared.tripped.load(Ordering::SeqCst) {
            return Ok(());
        }
        let cause = self.shared.cause.lock().clone();
        Err(cause.unwrap_or(Trap::TimeLimit))
    }

    /// Delivers an exception with a message to the armed checkpoint: the
    /// next `tick` inside the guarded operation unwinds with it.
    pub fn interrupt(&self, message: impl Into<String>) -> Result<(), GuardError> {
        if !self.armed {
            return Err(GuardError::NotArmed);
        }
        *self.shared.cause.lock() = Some(Trap::Interrupted(message.into()));
        self.shared.tripped.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Whether a checkpoint is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Default for ExecGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecGuard {
    fn drop(&mut self) {
        *self.shared.cmd.lock() = TimerCmd::Shutdown;
        self.shared.cv.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watchdog_loop(shared: &TimerShared) {
    let mut cmd = shared.cmd.lock();
    loop {
        match *cmd {
            TimerCmd::Shutdown => return,
            TimerCmd::Idle => {
                shared.cv.wait(&mut cmd);
            }
            TimerCmd::Watch { deadline, epoch } => {
                let timed_out = shared.cv.wait_until(&mut cmd, deadline).timed_out();
                if !timed_out {
                    // Re-armed, disarmed, or shutting down; loop re-reads.
                    continue;
                }
                // The deadline passed. Trip only if this watch is still the
                // active one: a disarm or re-arm bumps the epoch.
                if let TimerCmd::Watch { epoch: current, .. } = *cmd {
                    if current == epoch {
                        *shared.cause.lock() = Some(Trap::TimeLimit);
                        shared.tripped.store(true, Ordering::SeqCst);
                        *cmd = TimerCmd::Idle;
                    }
                }
            }
        }
    }
}
