/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The single notification channel between the core and its owner.
//!
//! Everything observable that is not a return value (caught errors, "now"
//! trigger rewrites, timeline callbacks, connection changes) travels as a
//! [`Notification`] on one unbounded `tokio::sync::mpsc` channel.  The owner
//! holds the [`NotificationReceiver`]; every component holds a cheap
//! [`Notifier`] clone.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::error;

use crate::clock::Time;

/// Receiving half handed to the owner by [`Conductor::new`](crate::conductor::Conductor::new).
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Which failure layer produced an [`ErrorReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    /// The resolver or the "now" fixup failed during a tick.
    Resolution,
    /// A device adapter failed in `handle_state` / `convert` / `diff`.
    Device,
    /// A transport rejected a dispatched command.
    Dispatch,
    /// Registration or mapping was rejected.
    Configuration,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSource::Resolution => "resolution",
            ErrorSource::Device => "device",
            ErrorSource::Dispatch => "dispatch",
            ErrorSource::Configuration => "configuration",
        };
        f.write_str(s)
    }
}

/// Structured error detail carried by [`Notification::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub source: ErrorSource,
    /// Offending device, when the failure is device-scoped.
    pub device_id: Option<String>,
    pub message: String,
}

/// A "now" trigger rewritten to a concrete time.
///
/// For nested objects `time` is relative to the enclosing group's start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTimeFix {
    pub id: String,
    pub time: Time,
}

/// Everything the core reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Error(ErrorReport),
    /// Objects whose `"now"` trigger was rewritten during a tick.  The owner
    /// should persist these times so the next timeline edit does not
    /// re-trigger "now" semantics.
    SetTimelineTriggerTime(Vec<TriggerTimeFix>),
    TimelineCallback {
        time: Time,
        object_id: String,
        callback: String,
        callback_data: Value,
    },
    ConnectionChanged {
        device_id: String,
        connected: bool,
    },
}

// ── Notifier ──────────────────────────────────────────────────────────────────

/// Sending half, cloned into every component.
///
/// Emitting never fails from the caller's point of view: once the owner drops
/// the receiver, notifications are discarded.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Create a connected notifier / receiver pair.
    pub fn channel() -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, notification: Notification) {
        // Closed receiver: the owner is gone, nothing left to tell.
        let _ = self.tx.send(notification);
    }

    /// Log an error and publish it as [`Notification::Error`].
    pub fn error(&self, source: ErrorSource, device_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        error!(source = %source, device = ?device_id, "{}", message);
        self.emit(Notification::Error(ErrorReport {
            source,
            device_id: device_id.map(str::to_owned),
            message,
        }));
    }
}
