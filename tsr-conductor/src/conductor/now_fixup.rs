/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! "now" trigger fixup.
//!
//! Objects triggered `"now"` get the concrete resolve instant written into a
//! *new* timeline snapshot:
//!
//! ```text
//!  top level      Absolute(Now) ──► Absolute(At(resolve_time))
//!  inside group   Absolute(Now) ──► Absolute(At(resolve_time - group_start))
//! ```
//!
//! A group's start is only known after a provisional resolve, and fixing
//! one level can resolve the next, so nested fixes run in passes until a
//! pass leaves nothing waiting on an unresolved group, or changes nothing.

use tracing::{debug, warn};

use crate::clock::Time;
use crate::notification::TriggerTimeFix;
use crate::timeline::{DevelopedTimeline, ResolveError, TimelineObject, TimelineResolver, Trigger, TriggerTime};

/// Result of [`fix_now_objects`].
#[derive(Debug, Clone, PartialEq)]
pub struct FixupOutcome {
    /// The rewritten snapshot (equal to the input when nothing was fixed).
    pub timeline: Vec<TimelineObject>,
    /// Every rewrite, in the order performed.
    pub fixed: Vec<TriggerTimeFix>,
    /// `false` if some nested `"now"` object is still waiting on a group
    /// whose start could not be resolved.
    pub converged: bool,
}

/// Rewrite every `"now"` trigger in `timeline` relative to `resolve_time`.
pub fn fix_now_objects(
    resolver: &dyn TimelineResolver,
    timeline: &[TimelineObject],
    resolve_time: Time,
    max_passes: usize,
) -> Result<FixupOutcome, ResolveError> {
    let mut timeline = timeline.to_vec();
    let mut fixed = Vec::new();

    for obj in &mut timeline {
        if obj.trigger.is_now() {
            obj.trigger = Trigger::Absolute(TriggerTime::At(resolve_time));
            fixed.push(TriggerTimeFix {
                id: obj.id.clone(),
                time: resolve_time,
            });
        }
    }

    let mut waiting = timeline.iter().any(has_nested_now);
    let mut passes = 0;
    while waiting && passes < max_passes {
        passes += 1;
        let window = resolver.windowed_timeline(&timeline, None, None)?;
        let developed = resolver.develop_around_time(&window, resolve_time)?;

        let mut pass = Pass {
            developed: &developed,
            resolve_time,
            fixed: &mut fixed,
            changed: false,
            waiting: false,
        };
        for obj in &mut timeline {
            pass.visit(obj);
        }
        let changed = pass.changed;
        waiting = pass.waiting;
        debug!(pass = passes, changed, waiting, "now fixup pass");

        if !changed {
            break;
        }
    }

    if waiting {
        warn!(
            resolve_time,
            passes, "\"now\" fixup did not converge; objects left unresolved"
        );
    }

    Ok(FixupOutcome {
        timeline,
        fixed,
        converged: !waiting,
    })
}

fn has_nested_now(obj: &TimelineObject) -> bool {
    obj.is_group
        && obj
            .children
            .iter()
            .any(|child| child.trigger.is_now() || has_nested_now(child))
}

struct Pass<'a> {
    developed: &'a DevelopedTimeline,
    resolve_time: Time,
    fixed: &'a mut Vec<TriggerTimeFix>,
    changed: bool,
    waiting: bool,
}

impl Pass<'_> {
    fn visit(&mut self, obj: &mut TimelineObject) {
        if !obj.is_group {
            return;
        }
        let group_start = self.developed.group_start(&obj.id);
        for child in &mut obj.children {
            if child.trigger.is_now() {
                match group_start {
                    Some(start) => {
                        let time = self.resolve_time - start;
                        child.trigger = Trigger::Absolute(TriggerTime::At(time));
                        self.fixed.push(TriggerTimeFix {
                            id: child.id.clone(),
                            time,
                        });
                        self.changed = true;
                    }
                    None => self.waiting = true,
                }
            }
            self.visit(child);
        }
    }
}
