/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors raised by a [`DeviceAdapter`](super::DeviceAdapter).
//!
//! The Conductor catches these per device and per tick: one failing device
//! never stops the others from receiving their state.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Resolved content could not be projected into device state.
    #[error("cannot convert layer '{layer}': {reason}")]
    Convert { layer: String, reason: String },

    /// The device has been terminated and accepts no more work.
    #[error("device '{0}' is terminated")]
    Terminated(String),

    /// Catch-all for custom adapters.
    #[error("{0}")]
    Other(String),
}
