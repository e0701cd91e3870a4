/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-device history of the device states last sent.
//!
//! ```text
//!  set_state(t, s):   ... [t-2] [t-1] [t] ╳[t+1] ╳[t+2]     later entries are stale speculation
//!  every Nth write:  ╳[old] ╳[old] [latest < now] [future ...]
//! ```

use std::collections::BTreeMap;

use tracing::trace;

use crate::clock::{SharedClock, Time};

/// Time-keyed cache with bounded growth.  At most one entry per time.
pub struct StateCache<S> {
    states: BTreeMap<Time, S>,
    writes: usize,
    /// Prune every `prune_interval` writes; `0` disables pruning.
    prune_interval: usize,
    clock: SharedClock,
}

impl<S> StateCache<S> {
    pub fn new(clock: SharedClock, prune_interval: usize) -> Self {
        Self {
            states: BTreeMap::new(),
            writes: 0,
            prune_interval,
            clock,
        }
    }

    /// Store `state` at `time` and discard every entry later than `time`.
    pub fn set_state(&mut self, time: Time, state: S) {
        self.states.insert(time, state);
        if let Some(after) = time.checked_add(1) {
            self.states.split_off(&after);
        }

        self.writes += 1;
        if self.prune_interval > 0 && self.writes % self.prune_interval == 0 {
            self.prune_before(self.clock.now());
        }
    }

    /// State with the greatest time strictly less than `time`.
    pub fn get_state_before(&self, time: Time) -> Option<&S> {
        self.states.range(..time).next_back().map(|(_, s)| s)
    }

    pub fn clear_all(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Collapse everything before `now` to the single most recent entry.
    fn prune_before(&mut self, now: Time) {
        let Some(keep_from) = self.states.range(..now).next_back().map(|(&t, _)| t) else {
            return;
        };
        let before = self.states.len();
        self.states = self.states.split_off(&keep_from);
        trace!(now, keep_from, pruned = before - self.states.len(), "state cache pruned");
    }
}
