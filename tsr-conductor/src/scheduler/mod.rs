/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-device command scheduler.
//!
//! A time-ordered queue of pending commands with cancel-by-time-range and a
//! self-driving dispatch task.
//!
//! ```text
//!  enqueue(t, cmd) ──► BTreeMap<(time, seq), entry> ──┐
//!  cancel_from(t)  ──►        (parking_lot)           │ earliest key
//!                              │                      ▼
//!                          Notify::notify_one   dispatch task: sleep(t - now)
//!                                                     │ pop every entry with time <= now
//!                                                     ▼
//!                                     CommandReceiver::send(time, cmd)  (awaited, in order)
//! ```
//!
//! # Guarantees
//!
//! | Property           | How                                                        |
//! |--------------------|------------------------------------------------------------|
//! | time order         | entries keyed by `(time, seq)` in a `BTreeMap`             |
//! | same-time FIFO     | `seq` is a per-scheduler monotonically increasing counter  |
//! | failure isolation  | a failed `send` becomes an `error` notification; the batch continues |
//! | no stale timer     | every mutation re-arms the task through `Notify`; `dispose` / `Drop` abort it |

pub mod error;

pub use error::TransportError;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::clock::{SharedClock, Time};
use crate::notification::{ErrorSource, Notifier};

// ── Transport seam ────────────────────────────────────────────────────────────

/// Outbound side of one device: receives each command at its due time.
#[async_trait]
pub trait CommandReceiver<C: Send + 'static>: Send + Sync + 'static {
    async fn send(&self, time: Time, command: C) -> Result<(), TransportError>;
}

/// Default receiver when the owner supplies none: logs every command.
#[derive(Debug, Clone)]
pub struct LoggingReceiver {
    device_id: String,
}

impl LoggingReceiver {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

#[async_trait]
impl<C: Debug + Send + 'static> CommandReceiver<C> for LoggingReceiver {
    async fn send(&self, time: Time, command: C) -> Result<(), TransportError> {
        info!(device = %self.device_id, time, command = ?command, "command");
        Ok(())
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

/// Handle returned by [`CommandScheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandToken(pub u64);

/// Introspection view of one queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub id: CommandToken,
    pub time: Time,
}

struct Entry<C> {
    id: CommandToken,
    payload: C,
}

struct Queue<C> {
    entries: BTreeMap<(Time, u64), Entry<C>>,
    next_seq: u64,
    disposed: bool,
}

struct Shared<C> {
    queue: Mutex<Queue<C>>,
    wake: Notify,
    clock: SharedClock,
}

impl<C> Shared<C> {
    fn earliest(&self) -> Option<Time> {
        let q = self.queue.lock();
        if q.disposed {
            return None;
        }
        q.entries.keys().next().map(|&(t, _)| t)
    }

    /// Remove and return the earliest entry if it is due.
    fn pop_due(&self) -> Option<(Time, C)> {
        let mut q = self.queue.lock();
        if q.disposed {
            return None;
        }
        let now = self.clock.now();
        match q.entries.keys().next() {
            Some(&(t, _)) if t <= now => q.entries.pop_first().map(|((t, _), e)| (t, e.payload)),
            _ => None,
        }
    }
}

// ── CommandScheduler ──────────────────────────────────────────────────────────

/// Time-ordered command queue with its own dispatch task.
///
/// Must be created inside a tokio runtime.
pub struct CommandScheduler<C: Send + 'static> {
    shared: Arc<Shared<C>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Send + 'static> CommandScheduler<C> {
    /// Spawn the dispatch task for device `device_id`.
    pub fn new(
        device_id: impl Into<String>,
        clock: SharedClock,
        receiver: Arc<dyn CommandReceiver<C>>,
        notifier: Notifier,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                entries: BTreeMap::new(),
                next_seq: 0,
                disposed: false,
            }),
            wake: Notify::new(),
            clock,
        });
        let task = tokio::spawn(dispatch_loop(
            Arc::clone(&shared),
            receiver,
            notifier,
            device_id.into(),
        ));
        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue `payload` for dispatch at `time`.  A time in the past dispatches
    /// on the next wake.
    pub fn enqueue(&self, time: Time, payload: C) -> CommandToken {
        let id = {
            let mut q = self.shared.queue.lock();
            let seq = q.next_seq;
            q.next_seq += 1;
            let id = CommandToken(seq);
            if !q.disposed {
                q.entries.insert((time, seq), Entry { id, payload });
            }
            id
        };
        self.shared.wake.notify_one();
        id
    }

    /// Drop every pending entry with `time >= from` (inclusive) or
    /// `time > from` (exclusive).  Returns how many were removed.
    pub fn cancel_from(&self, from: Time, inclusive: bool) -> usize {
        let removed = {
            let mut q = self.shared.queue.lock();
            let before = q.entries.len();
            q.entries
                .retain(|&(t, _), _| if inclusive { t < from } else { t <= from });
            before - q.entries.len()
        };
        if removed > 0 {
            trace!(from, inclusive, removed, "cancelled pending commands");
            self.shared.wake.notify_one();
        }
        removed
    }

    /// Drop one pending entry.  `false` if it already ran or was cancelled.
    pub fn cancel(&self, token: CommandToken) -> bool {
        let mut q = self.shared.queue.lock();
        let key = q
            .entries
            .iter()
            .find(|(_, e)| e.id == token)
            .map(|(&key, _)| key);
        key.and_then(|k| q.entries.remove(&k)).is_some()
    }

    /// `cancel_from(time, false)`.
    pub fn cancel_after(&self, time: Time) -> usize {
        self.cancel_from(time, false)
    }

    /// Pending entries in dispatch order.  No side effects.
    pub fn list_pending(&self) -> Vec<PendingCommand> {
        self.shared
            .queue
            .lock()
            .entries
            .iter()
            .map(|(&(time, _), e)| PendingCommand { id: e.id, time })
            .collect()
    }

    /// Drop everything and stop the dispatch task.  Idempotent.
    pub fn dispose(&self) {
        {
            let mut q = self.shared.queue.lock();
            q.disposed = true;
            q.entries.clear();
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl<C: Send + 'static> Drop for CommandScheduler<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn dispatch_loop<C: Send + 'static>(
    shared: Arc<Shared<C>>,
    receiver: Arc<dyn CommandReceiver<C>>,
    notifier: Notifier,
    device_id: String,
) {
    loop {
        let Some(due) = shared.earliest() else {
            if shared.queue.lock().disposed {
                return;
            }
            shared.wake.notified().await;
            continue;
        };

        let delay = (due - shared.clock.now()).max(0);
        if delay > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay as u64)) => {}
                // Queue changed: recompute the earliest entry.
                _ = shared.wake.notified() => continue,
            }
        }

        while let Some((time, payload)) = shared.pop_due() {
            debug!(device = %device_id, time, "dispatching command");
            if let Err(e) = receiver.send(time, payload).await {
                notifier.error(
                    ErrorSource::Dispatch,
                    Some(&device_id),
                    format!("command at {} failed: {}", time, e),
                );
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::notification::Notification;

    /// Records every dispatched command; fails on payloads starting with "bad".
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Time, String)>>,
    }

    #[async_trait]
    impl CommandReceiver<String> for Recorder {
        async fn send(&self, time: Time, command: String) -> Result<(), TransportError> {
            let failed = command.starts_with("bad");
            self.sent.lock().push((time, command.clone()));
            if failed {
                Err(TransportError::Rejected(command))
            } else {
                Ok(())
            }
        }
    }

    fn scheduler() -> (
        CommandScheduler<String>,
        Arc<Recorder>,
        crate::notification::NotificationReceiver,
    ) {
        let recorder = Arc::new(Recorder::default());
        let (notifier, rx) = Notifier::channel();
        let s = CommandScheduler::new(
            "dev0",
            Arc::new(TokioClock::starting_at(0)),
            recorder.clone(),
            notifier,
        );
        (s, recorder, rx)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn sent(r: &Recorder) -> Vec<(Time, String)> {
        r.sent.lock().clone()
    }

    // ── ordering ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn dispatches_in_time_then_enqueue_order() {
        let (s, rec, _rx) = scheduler();
        s.enqueue(300, "c".into());
        s.enqueue(100, "a".into());
        s.enqueue(100, "b".into());

        advance(99).await;
        assert!(sent(&rec).is_empty(), "nothing is due yet");

        advance(201).await;
        assert_eq!(
            sent(&rec),
            vec![(100, "a".into()), (100, "b".into()), (300, "c".into())]
        );
        assert!(s.list_pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn past_commands_dispatch_immediately() {
        let (s, rec, _rx) = scheduler();
        advance(50).await;
        s.enqueue(10, "late".into());
        settle().await;
        assert_eq!(sent(&rec), vec![(10, "late".into())]);
    }

    // ── cancellation ──────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn cancel_from_inclusive_and_exclusive() {
        let (s, _rec, _rx) = scheduler();
        for t in [100, 200, 200, 300] {
            s.enqueue(t, format!("t{t}"));
        }

        assert_eq!(s.cancel_from(200, false), 1);
        let times: Vec<Time> = s.list_pending().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![100, 200, 200]);

        assert_eq!(s.cancel_from(200, true), 2);
        let times: Vec<Time> = s.list_pending().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_is_idempotent_and_safe_on_empty_queue() {
        let (s, rec, _rx) = scheduler();
        assert_eq!(s.cancel_after(0), 0);

        s.enqueue(100, "keep".into());
        s.enqueue(500, "drop".into());
        s.cancel_after(100);
        let once = s.list_pending();
        s.cancel_after(100);
        assert_eq!(s.list_pending(), once);

        advance(600).await;
        assert_eq!(sent(&rec), vec![(100, "keep".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_listed_in_dispatch_order() {
        let (s, _rec, _rx) = scheduler();
        let late = s.enqueue(200, "x".into());
        let early = s.enqueue(100, "y".into());
        let ids: Vec<CommandToken> = s.list_pending().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    // ── failures ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_is_reported_and_batch_continues() {
        let (s, rec, mut rx) = scheduler();
        s.enqueue(100, "bad one".into());
        s.enqueue(100, "good".into());
        s.enqueue(200, "later".into());

        advance(250).await;
        assert_eq!(sent(&rec).len(), 3);

        match rx.try_recv().unwrap() {
            Notification::Error(report) => {
                assert_eq!(report.source, ErrorSource::Dispatch);
                assert_eq!(report.device_id.as_deref(), Some("dev0"));
                assert!(report.message.contains("bad one"));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    // ── dispose ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn dispose_drops_pending_and_stops_dispatch() {
        let (s, rec, _rx) = scheduler();
        s.enqueue(100, "never".into());
        s.dispose();
        s.dispose();
        s.enqueue(150, "ignored".into());

        advance(500).await;
        assert!(sent(&rec).is_empty());
        assert!(s.list_pending().is_empty());
    }
}
