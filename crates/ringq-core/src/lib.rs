//! # ringq-core
//!
//! A circular doubly-linked-list queue engine built to be tested under
//! adversarial conditions. The engine performs every allocation through an
//! injectable fault allocator (deny-the-Nth, deny-probabilistically, leak
//! and double-release accounting) and polls an execution guard at every
//! traversal step, so a watchdog expiry unwinds cleanly to the caller
//! instead of hanging or crashing the harness.
//!
//! No `unsafe` code is permitted in this crate; the chain is id-linked
//! rather than pointer-linked, so invalid memory access is structurally
//! impossible rather than trapped.

#![deny(unsafe_code)]

pub mod alloc;
pub mod guard;
pub mod list;
pub mod queue;

pub use alloc::{AllocEvent, AllocId, EventLevel, FaultAllocator};
pub use guard::{ExecGuard, GuardError, Trap};
pub use queue::{Queue, Removed};
