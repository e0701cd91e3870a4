/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Tunables and setup-file loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! timing:                 # optional, every key optional
//!   lookahead_ms: 5000
//!   prepare_time_ms: 2000
//! devices:
//!   myAbstract: { type: abstract }
//!   myLawo:
//!     type: lawo
//!     options: { host: 10.0.0.5, port: 9000, sources_path: "Sapphire.Sources" }
//! mappings:
//!   layer0: { device: abstract, device_id: myAbstract }
//!   fader1: { device: lawo, device_id: myLawo, identifier: "Mic 1" }
//! ```
//!
//! The timeline itself lives in a separate JSON file: an array of
//! [`TimelineObject`]s.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Time;
use crate::device::DeviceOptions;
use crate::mapping::{self, Mappings};
use crate::timeline::TimelineObject;

// ── ConductorConfig ───────────────────────────────────────────────────────────

/// Timing constants of the resolution loop and the state caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Forward window the loop resolves and schedules within.
    pub lookahead_ms: Time,
    /// How long before an upcoming event the loop wakes to prepare commands.
    pub prepare_time_ms: Time,
    /// Lower bound on any wake delay.
    pub min_trigger_time_ms: Time,
    /// Events are searched strictly after `resolve_time + min_time_unit_ms`.
    pub min_time_unit_ms: Time,
    /// Upper bound on "now" fixup passes per tick.
    pub max_fixup_passes: usize,
    /// Every Nth cache write collapses entries older than now.
    pub state_prune_interval: usize,
    /// Call `init()` from `Conductor::new`.
    pub auto_init: bool,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 5000,
            prepare_time_ms: 2000,
            min_trigger_time_ms: 10,
            min_time_unit_ms: 1,
            max_fixup_passes: 10,
            state_prune_interval: 10,
            auto_init: false,
        }
    }
}

impl ConductorConfig {
    /// Wake delay for an event at `event_time`, seen at `now`.
    ///
    /// `clamp((event_time - now) - prepare, min_trigger, lookahead)`.
    pub fn wake_delay(&self, event_time: Time, now: Time) -> Time {
        let lower = self.min_trigger_time_ms;
        let upper = self.lookahead_ms.max(lower);
        ((event_time - now) - self.prepare_time_ms).clamp(lower, upper)
    }
}

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Deserialize)]
struct SetupFile {
    #[serde(default)]
    timing: ConductorConfig,
    #[serde(default)]
    devices: BTreeMap<String, DeviceOptions>,
    #[serde(default)]
    mappings: Mappings,
}

// ── Setup ─────────────────────────────────────────────────────────────────────

/// A parsed and validated setup file.
#[derive(Debug, Clone, Default)]
pub struct Setup {
    pub config: ConductorConfig,
    /// Device id → connection options.
    pub devices: BTreeMap<String, DeviceOptions>,
    pub mappings: Mappings,
}

impl Setup {
    /// Parse `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or a mapping entry fails validation.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading setup from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open setup file: {}", path.display()))?;

        let file: SetupFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        mapping::validate_all(&file.mappings)
            .with_context(|| format!("Invalid mapping in {}", path.display()))?;

        for (id, options) in &file.devices {
            debug!(device = %id, kind = %options.device_type, "  device");
        }
        for (layer, m) in &file.mappings {
            if !file.devices.contains_key(&m.device_id) {
                warn!(layer = %layer, device = %m.device_id, "mapping targets an undeclared device");
            }
        }

        info!(
            devices = file.devices.len(),
            mappings = file.mappings.len(),
            lookahead_ms = file.timing.lookahead_ms,
            "Setup loaded"
        );

        Ok(Self {
            config: file.timing,
            devices: file.devices,
            mappings: file.mappings,
        })
    }
}

/// Parse a JSON timeline file.
pub fn load_timeline(path: &Path) -> Result<Vec<TimelineObject>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot open timeline file: {}", path.display()))?;
    let timeline: Vec<TimelineObject> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse timeline JSON: {}", path.display()))?;
    info!(objects = timeline.len(), "Timeline loaded from {}", path.display());
    Ok(timeline)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
