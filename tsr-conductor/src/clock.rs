/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Clock sources.
//!
//! Every piece of scheduling math in the crate is relative to a single
//! injected [`Clock`].  Production code uses [`SystemClock`]; tests use
//! [`TokioClock`], which follows tokio's (pausable) virtual time so that the
//! clock and every `tokio::time::sleep` advance together.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds.  Signed: timeline objects may legitimately start before 0.
pub type Time = i64;

/// Shared handle to the clock injected at construction.
pub type SharedClock = Arc<dyn Clock>;

/// Source of "now", in milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Time;
}

// ── SystemClock ───────────────────────────────────────────────────────────────

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Time {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Time)
            .unwrap_or(0)
    }
}

// ── TokioClock ────────────────────────────────────────────────────────────────

/// Clock driven by `tokio::time::Instant`.
///
/// `now() = origin + elapsed` where `elapsed` is measured on tokio's clock.
/// Under `#[tokio::test(start_paused = true)]` the value only moves when the
/// runtime's virtual time moves, which makes the resolution loop and the
/// command schedulers fully deterministic.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: tokio::time::Instant,
    origin: Time,
}

impl TokioClock {
    /// A clock reading `origin` right now.
    pub fn starting_at(origin: Time) -> Self {
        Self {
            base: tokio::time::Instant::now(),
            origin,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Time {
        self.origin + self.base.elapsed().as_millis() as Time
    }
}
