/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Timeline callbacks.
//!
//! A resolved layer whose content names a `callback` fires a
//! `TimelineCallback` notification at the layer's start time.  Callbacks
//! are events, not device commands: they run through the Conductor's own
//! [`CommandScheduler`], independent of any device.
//!
//! An occurrence is keyed by `(object id, start time)` and queued once for
//! as long as it keeps appearing in resolutions.  When it stops appearing a
//! still-pending callback is withdrawn.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::clock::{SharedClock, Time};
use crate::notification::{Notification, Notifier};
use crate::scheduler::{CommandReceiver, CommandScheduler, CommandToken, TransportError};
use crate::timeline::ResolvedState;

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEvent {
    pub object_id: String,
    pub callback: String,
    pub callback_data: Value,
}

struct CallbackEmitter {
    notifier: Notifier,
}

#[async_trait]
impl CommandReceiver<CallbackEvent> for CallbackEmitter {
    async fn send(&self, time: Time, event: CallbackEvent) -> Result<(), TransportError> {
        self.notifier.emit(Notification::TimelineCallback {
            time,
            object_id: event.object_id,
            callback: event.callback,
            callback_data: event.callback_data,
        });
        Ok(())
    }
}

type OccurrenceKey = (String, Time);

pub struct CallbackQueue {
    scheduler: CommandScheduler<CallbackEvent>,
    queued: Mutex<BTreeMap<OccurrenceKey, CommandToken>>,
}

impl CallbackQueue {
    pub fn new(clock: SharedClock, notifier: Notifier) -> Self {
        let emitter: Arc<dyn CommandReceiver<CallbackEvent>> = Arc::new(CallbackEmitter {
            notifier: notifier.clone(),
        });
        Self {
            scheduler: CommandScheduler::new("callbacks", clock, emitter, notifier),
            queued: Mutex::new(BTreeMap::new()),
        }
    }

    /// Align queued callbacks with the callbacks present in `state`.
    pub fn sync(&self, state: &ResolvedState) {
        let current: BTreeMap<OccurrenceKey, CallbackEvent> = state
            .layers
            .values()
            .filter_map(|layer| {
                layer.callback().map(|callback| {
                    (
                        (layer.id.clone(), layer.start_time),
                        CallbackEvent {
                            object_id: layer.id.clone(),
                            callback: callback.to_string(),
                            callback_data: layer.callback_data(),
                        },
                    )
                })
            })
            .collect();

        let mut queued = self.queued.lock();
        queued.retain(|key, token| {
            let keep = current.contains_key(key);
            if !keep {
                self.scheduler.cancel(*token);
            }
            keep
        });
        for (key, event) in current {
            if !queued.contains_key(&key) {
                debug!(object = %key.0, time = key.1, callback = %event.callback, "callback queued");
                let token = self.scheduler.enqueue(key.1, event);
                queued.insert(key, token);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.scheduler.list_pending().len()
    }

    pub fn dispose(&self) {
        self.scheduler.dispose();
        self.queued.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::device::tests::resolved;
    use serde_json::json;
    use std::time::Duration;

    fn callback_state(time: Time, id: &str) -> ResolvedState {
        resolved(
            time,
            &[("cb", id, json!({ "callback": "onAir", "callback_data": { "story": 7 } }))],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn callback_fires_once_per_occurrence() {
        let (notifier, mut rx) = Notifier::channel();
        let q = CallbackQueue::new(Arc::new(TokioClock::starting_at(0)), notifier);

        q.sync(&callback_state(100, "obj"));
        q.sync(&callback_state(100, "obj"));
        assert_eq!(q.pending(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::TimelineCallback {
                time: 100,
                object_id: "obj".into(),
                callback: "onAir".into(),
                callback_data: json!({ "story": 7 }),
            }
        );

        q.sync(&callback_state(100, "obj"));
        assert_eq!(q.pending(), 0, "still the same occurrence");
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_occurrence_is_withdrawn() {
        let (notifier, _rx) = Notifier::channel();
        let q = CallbackQueue::new(Arc::new(TokioClock::starting_at(0)), notifier);
        q.sync(&callback_state(500, "obj"));
        assert_eq!(q.pending(), 1);

        q.sync(&ResolvedState::empty(500));
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn layers_without_callback_are_ignored() {
        let (notifier, _rx) = Notifier::channel();
        let q = CallbackQueue::new(Arc::new(TokioClock::starting_at(0)), notifier);
        q.sync(&resolved(0, &[("L", "obj", json!({ "type": "video" }))]));
        assert_eq!(q.pending(), 0);
    }
}
