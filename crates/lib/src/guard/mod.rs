//! Two-tier concurrency guard.
//!
//! The execution lock collapses retried deliveries of one webhook to a single processing
//! attempt per (device, sender). The session lock is narrower and only wraps the AI call, so a
//! different message arriving mid-reply never produces a concurrent reply. Both lock tables
//! are injected stores; the in-memory ones serve a single process.

mod execution;
mod session;

pub use execution::{
    ExecutionLock, ExecutionLockStore, ExecutionPermit, ExecutionToken, InMemoryExecutionLockStore,
};
pub use session::{InMemorySessionLockStore, SessionGuard, SessionLock, SessionLockStore};
