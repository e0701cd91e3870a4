/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! tsr-conductor – timeline state resolver and device command scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── clock          – millisecond time source (system / tokio-driven)
//! ├── notification   – events published to the owner
//! ├── timeline/      – timeline model + resolver contract and BasicResolver
//! ├── mapping        – layer → device routing
//! ├── config/        – timing constants, YAML setup, JSON timeline files
//! ├── scheduler/     – timed command queue per device
//! ├── device/        – state cache, Device<B> pipeline, built-in families
//! └── conductor/     – resolution loop, "now" fixup, callbacks
//! ```

pub mod clock;
pub mod conductor;
pub mod config;
pub mod device;
pub mod mapping;
pub mod notification;
pub mod scheduler;
pub mod timeline;
