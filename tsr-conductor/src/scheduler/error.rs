/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors a command transport may return from
//! [`CommandReceiver::send`](super::CommandReceiver::send).
//!
//! The scheduler's own operations never fail; only dispatch into a
//! transport does, and those failures are reported, not retried.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The device (or its transport) refused the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The transport does not understand the command payload.
    #[error("unsupported command: {0}")]
    Unsupported(String),
}
