/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timeline resolution service.
//!
//! The Conductor treats resolution as an external, pure service behind the
//! [`TimelineResolver`] trait.  [`BasicResolver`] is a small built-in
//! implementation covering absolute triggers, groups and simple relative
//! references (`"#id.start + 100"`, `"#id.end - 50"`), enough to drive the
//! crate end-to-end.  Richer engines (logical class expressions, keyframes,
//! repeating groups) plug in through the same trait.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::debug;

use super::{ResolveError, ResolvedLayer, ResolvedState, TimelineObject, Trigger, TriggerTime};
use crate::clock::Time;

// ── Contract ──────────────────────────────────────────────────────────────────

/// Whether a [`NextEvent`] is an object starting or ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    Start,
    End,
}

/// A discrete change in the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextEvent {
    pub time: Time,
    pub object_id: String,
    pub kind: EventKind,
}

/// Group start times learned by developing a timeline around an instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevelopedTimeline {
    group_starts: BTreeMap<String, Time>,
}

impl DevelopedTimeline {
    pub fn from_starts(starts: impl IntoIterator<Item = (String, Time)>) -> Self {
        Self {
            group_starts: starts.into_iter().collect(),
        }
    }

    /// Resolved start of group `id`, or `None` if the group is unresolved.
    pub fn group_start(&self, id: &str) -> Option<Time> {
        self.group_starts.get(id).copied()
    }
}

/// The four resolution operations the Conductor needs.
///
/// All of them are pure functions of their inputs.
pub trait TimelineResolver: Send + Sync + 'static {
    /// State of every layer at `time`.
    fn resolve_at(&self, timeline: &[TimelineObject], time: Time)
        -> Result<ResolvedState, ResolveError>;

    /// Up to `count` events with `event.time > after`, ascending.
    fn next_events_after(
        &self,
        timeline: &[TimelineObject],
        after: Time,
        count: usize,
    ) -> Result<Vec<NextEvent>, ResolveError>;

    /// Top-level objects that may be active inside `[from, to)`, plus the
    /// objects their relative triggers depend on.  `None` leaves that side
    /// of the window unbounded.
    fn windowed_timeline(
        &self,
        timeline: &[TimelineObject],
        from: Option<Time>,
        to: Option<Time>,
    ) -> Result<Vec<TimelineObject>, ResolveError>;

    /// Resolve group start times around `time`.
    fn develop_around_time(
        &self,
        timeline: &[TimelineObject],
        time: Time,
    ) -> Result<DevelopedTimeline, ResolveError>;
}

// ── BasicResolver ─────────────────────────────────────────────────────────────

/// Built-in resolver.
///
/// * `Absolute(At(t))` starts at `parent_start + t` (parent start is `0` at
///   the top level).
/// * `Relative("#id.start|end ± N")` starts relative to another object's
///   resolved absolute start or end.
/// * `Absolute(Now)` and `Logical(..)` are left unresolved.
/// * `duration == 0` is open-ended; children never outlive their group.
/// * Layer winner: highest `priority`, then latest start, then latest
///   timeline position.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicResolver;

impl BasicResolver {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: Time,
    end: Option<Time>,
}

impl Span {
    fn contains(&self, t: Time) -> bool {
        self.start <= t && self.end.map_or(true, |e| t < e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RelativeRef {
    target: String,
    anchor: Anchor,
    offset: Time,
}

/// Parse `"#id.start"`, `"#id.end + 500"`, `"#id.start-20"`.
fn parse_relative(expression: &str) -> Option<RelativeRef> {
    let rest = expression.trim().strip_prefix('#')?;

    let start_pos = rest.rfind(".start").map(|p| (p, Anchor::Start, ".start".len()));
    let end_pos = rest.rfind(".end").map(|p| (p, Anchor::End, ".end".len()));
    let (pos, anchor, len) = match (start_pos, end_pos) {
        (Some(s), Some(e)) => {
            if s.0 > e.0 {
                s
            } else {
                e
            }
        }
        (Some(s), None) => s,
        (None, Some(e)) => e,
        (None, None) => return None,
    };

    let target = rest[..pos].trim();
    if target.is_empty() {
        return None;
    }

    let tail = rest[pos + len..].trim();
    let offset = if tail.is_empty() {
        0
    } else {
        let (negative, number) = match (tail.strip_prefix('+'), tail.strip_prefix('-')) {
            (Some(number), _) => (false, number),
            (_, Some(number)) => (true, number),
            _ => return None,
        };
        let n: Time = number.trim().parse().ok()?;
        if negative {
            -n
        } else {
            n
        }
    };

    Some(RelativeRef {
        target: target.to_string(),
        anchor,
        offset,
    })
}

/// Depth-first flattening of a timeline with parent links.
struct Flattened<'a> {
    objects: Vec<&'a TimelineObject>,
    parents: Vec<Option<usize>>,
    index: HashMap<&'a str, usize>,
    spans: Vec<Option<Span>>,
}

impl<'a> Flattened<'a> {
    fn build(timeline: &'a [TimelineObject]) -> Result<Self, ResolveError> {
        let mut flat = Flattened {
            objects: Vec::new(),
            parents: Vec::new(),
            index: HashMap::new(),
            spans: Vec::new(),
        };
        for obj in timeline {
            flat.push(obj, None)?;
        }
        flat.spans = vec![None; flat.objects.len()];
        flat.resolve_spans()?;
        Ok(flat)
    }

    fn push(&mut self, obj: &'a TimelineObject, parent: Option<usize>) -> Result<(), ResolveError> {
        let i = self.objects.len();
        if self.index.insert(obj.id.as_str(), i).is_some() {
            return Err(ResolveError::DuplicateId(obj.id.clone()));
        }
        self.objects.push(obj);
        self.parents.push(parent);
        if obj.is_group {
            for child in &obj.children {
                self.push(child, Some(i))?;
            }
        }
        Ok(())
    }

    /// Fixed-point pass: every round resolves whatever has become resolvable
    /// (a parent, or a relative reference target).
    fn resolve_spans(&mut self) -> Result<(), ResolveError> {
        let mut relatives: Vec<Option<RelativeRef>> = Vec::with_capacity(self.objects.len());
        for obj in &self.objects {
            relatives.push(match &obj.trigger {
                Trigger::Relative(expr) => Some(parse_relative(expr).ok_or_else(|| {
                    ResolveError::InvalidExpression {
                        object: obj.id.clone(),
                        expression: expr.clone(),
                    }
                })?),
                _ => None,
            });
        }

        loop {
            let mut progressed = false;
            for i in 0..self.objects.len() {
                if self.spans[i].is_some() {
                    continue;
                }
                let parent = match self.parents[i] {
                    None => None,
                    Some(p) => match self.spans[p] {
                        Some(span) => Some(span),
                        None => continue,
                    },
                };
                let obj = self.objects[i];
                let start = match (&obj.trigger, &relatives[i]) {
                    (Trigger::Absolute(TriggerTime::At(t)), _) => {
                        Some(parent.map_or(0, |p| p.start) + t)
                    }
                    (Trigger::Relative(_), Some(rel)) => self
                        .index
                        .get(rel.target.as_str())
                        .and_then(|&j| self.spans[j])
                        .and_then(|target| match rel.anchor {
                            Anchor::Start => Some(target.start),
                            Anchor::End => target.end,
                        })
                        .map(|t| t + rel.offset),
                    _ => None,
                };
                let Some(start) = start else { continue };

                let mut end = (obj.duration > 0).then(|| start + obj.duration);
                if let Some(parent_end) = parent.and_then(|p| p.end) {
                    end = Some(end.map_or(parent_end, |e| e.min(parent_end)));
                }
                self.spans[i] = Some(Span { start, end });
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        Ok(())
    }

    /// Active at `t`: own span contains `t`, and so does every ancestor's.
    fn is_active(&self, i: usize, t: Time) -> bool {
        let mut cur = Some(i);
        while let Some(c) = cur {
            match self.spans[c] {
                Some(span) if span.contains(t) => cur = self.parents[c],
                _ => return false,
            }
        }
        true
    }
}

fn mixer_values(content: &Value) -> BTreeMap<String, f64> {
    content
        .get("mixer")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                .collect()
        })
        .unwrap_or_default()
}

impl TimelineResolver for BasicResolver {
    fn resolve_at(
        &self,
        timeline: &[TimelineObject],
        time: Time,
    ) -> Result<ResolvedState, ResolveError> {
        let flat = Flattened::build(timeline)?;

        // layer → (priority, start, position)
        let mut winners: BTreeMap<&str, (i32, Time, usize)> = BTreeMap::new();
        for (i, obj) in flat.objects.iter().enumerate() {
            if obj.is_group || obj.layer.is_empty() || !flat.is_active(i, time) {
                continue;
            }
            let Some(span) = flat.spans[i] else { continue };
            let key = (obj.priority, span.start, i);
            winners
                .entry(obj.layer.as_str())
                .and_modify(|best| {
                    if key > *best {
                        *best = key;
                    }
                })
                .or_insert(key);
        }

        let mut state = ResolvedState::empty(time);
        for (layer, (_, start, i)) in winners {
            let obj = flat.objects[i];
            let end = flat.spans[i].and_then(|s| s.end);
            state.layers.insert(
                layer.to_string(),
                ResolvedLayer {
                    id: obj.id.clone(),
                    layer: layer.to_string(),
                    content: obj.content.clone(),
                    start_time: start,
                    end_time: end,
                    mixer: mixer_values(&obj.content),
                    is_background: false,
                    original_layer: None,
                },
            );
        }

        debug!(time, layers = state.layers.len(), "timeline resolved");
        Ok(state)
    }

    fn next_events_after(
        &self,
        timeline: &[TimelineObject],
        after: Time,
        count: usize,
    ) -> Result<Vec<NextEvent>, ResolveError> {
        let flat = Flattened::build(timeline)?;

        let mut events = Vec::new();
        for (i, span) in flat.spans.iter().enumerate() {
            let Some(span) = span else { continue };
            let id = &flat.objects[i].id;
            if span.start > after {
                events.push(NextEvent {
                    time: span.start,
                    object_id: id.clone(),
                    kind: EventKind::Start,
                });
            }
            if let Some(end) = span.end.filter(|&e| e > after) {
                events.push(NextEvent {
                    time: end,
                    object_id: id.clone(),
                    kind: EventKind::End,
                });
            }
        }
        events.sort_by(|a, b| {
            (a.time, a.kind, &a.object_id).cmp(&(b.time, b.kind, &b.object_id))
        });
        events.truncate(count);
        Ok(events)
    }

    fn windowed_timeline(
        &self,
        timeline: &[TimelineObject],
        from: Option<Time>,
        to: Option<Time>,
    ) -> Result<Vec<TimelineObject>, ResolveError> {
        let flat = Flattened::build(timeline)?;

        // Top-level position of every flattened object (parents precede
        // their children in the flattening).
        let mut roots = Vec::with_capacity(flat.objects.len());
        let mut top_level = Vec::with_capacity(timeline.len());
        for (i, parent) in flat.parents.iter().enumerate() {
            match parent {
                None => {
                    roots.push(top_level.len());
                    top_level.push(i);
                }
                Some(p) => roots.push(roots[*p]),
            }
        }

        let mut keep: Vec<bool> = top_level
            .iter()
            .map(|&i| match flat.spans[i] {
                // Unresolved objects are kept: a later pass may resolve them.
                None => true,
                Some(span) => {
                    let starts_before_end = to.map_or(true, |to| span.start < to);
                    let ends_after_start = match (from, span.end) {
                        (Some(from), Some(end)) => end > from,
                        _ => true,
                    };
                    starts_before_end && ends_after_start
                }
            })
            .collect();

        // A kept object needs every top-level object its relative triggers
        // (or its descendants') point at, transitively.
        let mut references: Vec<Vec<usize>> = vec![Vec::new(); top_level.len()];
        for (i, obj) in flat.objects.iter().enumerate() {
            let Trigger::Relative(expression) = &obj.trigger else { continue };
            let target = parse_relative(expression).and_then(|r| flat.index.get(r.target.as_str()).copied());
            if let Some(target) = target {
                references[roots[i]].push(roots[target]);
            }
        }
        let mut pending: Vec<usize> = (0..keep.len()).filter(|&r| keep[r]).collect();
        while let Some(r) = pending.pop() {
            for &dep in &references[r] {
                if !keep[dep] {
                    keep[dep] = true;
                    pending.push(dep);
                }
            }
        }

        Ok(timeline
            .iter()
            .zip(keep)
            .filter_map(|(obj, kept)| kept.then(|| obj.clone()))
            .collect())
    }

    fn develop_around_time(
        &self,
        timeline: &[TimelineObject],
        _time: Time,
    ) -> Result<DevelopedTimeline, ResolveError> {
        // No repeating groups here, so group starts do not depend on `time`.
        let flat = Flattened::build(timeline)?;
        Ok(DevelopedTimeline::from_starts(
            flat.objects
                .iter()
                .zip(&flat.spans)
                .filter(|(obj, _)| obj.is_group)
                .filter_map(|(obj, span)| span.map(|s| (obj.id.clone(), s.start))),
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
