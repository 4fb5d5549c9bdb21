//! Time keeping for the blocking session loops.
//!
//! The session model is synchronous, so all timing is wall-clock based and
//! built directly on [`std::time`].

pub use std::time::{Duration, Instant};

/// Outer wall-clock limit of a polling loop.
///
/// The deadline is checked at loop-top; it bounds the total time spent in a
/// retry loop while the per-attempt timeout bounds each individual exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    end: Instant,
}

impl Deadline {
    /// Create a deadline that expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            end: Instant::now() + timeout,
        }
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.end
    }
}
