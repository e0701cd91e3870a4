/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors returned from the [`Conductor`](super::Conductor) API.
//!
//! Failures *inside* a tick never come back this way; they are published on
//! the notification channel.  These are the rejections an owner gets
//! synchronously: registration and mapping problems.

use thiserror::Error;

use crate::device::DeviceError;
use crate::mapping::{DeviceType, MappingError};

#[derive(Debug, Error)]
pub enum ConductorError {
    /// No built-in adapter exists for this family.
    #[error("device '{device_id}': no adapter for device type '{device_type}'")]
    UnsupportedDeviceType {
        device_id: String,
        device_type: DeviceType,
    },

    #[error("device '{0}' is already registered")]
    DuplicateDevice(String),

    #[error("device '{0}' not found")]
    DeviceNotFound(String),

    #[error("invalid mapping: {0}")]
    Mapping(#[from] MappingError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// `destroy()` has been called.
    #[error("conductor has been destroyed")]
    Destroyed,
}
