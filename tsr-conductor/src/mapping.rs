/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Layer → device mapping.
//!
//! A [`Mapping`] binds one logical layer to a device id, a device family and
//! a family-specific locator (channel/layer, matrix identifier, ...).  The
//! whole table is an immutable [`Mappings`] snapshot, replaced wholesale by
//! `Conductor::set_mapping`.
//!
//! # Routing
//!
//! ```text
//!  resolved layer "L"  ──► mappings["L"]               ─┐
//!                                                        ├─► Some(mapping) if
//!  background layer    ──► mappings[original_layer]    ─┘    device_id == D.id
//!  (no own mapping)                                          && device == D.type
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::timeline::{ResolvedLayer, ResolvedState};

// ── Device families ───────────────────────────────────────────────────────────

/// Device family, used both for routing and to pick an adapter on
/// `Conductor::add_device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Abstract,
    #[serde(rename = "casparcg")]
    CasparCg,
    Atem,
    Lawo,
    #[serde(rename = "httpsend")]
    HttpSend,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceType::Abstract => "abstract",
            DeviceType::CasparCg => "casparcg",
            DeviceType::Atem => "atem",
            DeviceType::Lawo => "lawo",
            DeviceType::HttpSend => "httpsend",
        };
        f.write_str(s)
    }
}

// ── Mapping ───────────────────────────────────────────────────────────────────

/// Family-specific addressing inside a device.  Which fields are required
/// depends on the [`DeviceType`]; see [`Mapping::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Lawo source identifier (e.g. `"Mic 1"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Atem mapping kind (e.g. `"me"`, `"dsk"`, `"aux"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub device: DeviceType,
    pub device_id: String,
    #[serde(flatten)]
    pub locator: Locator,
}

/// Layer name → mapping.  `BTreeMap` for deterministic iteration.
pub type Mappings = BTreeMap<String, Mapping>;

impl Mapping {
    pub fn new(device: DeviceType, device_id: impl Into<String>) -> Self {
        Self {
            device,
            device_id: device_id.into(),
            locator: Locator::default(),
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    /// `true` if this mapping targets exactly the device `(device_id, device_type)`.
    pub fn targets(&self, device_id: &str, device_type: DeviceType) -> bool {
        self.device_id == device_id && self.device == device_type
    }

    /// Check the locator fields the device family needs.
    pub fn validate(&self, layer: &str) -> Result<(), MappingError> {
        let missing = |field: &'static str| MappingError::MissingField {
            layer: layer.to_string(),
            device: self.device,
            field,
        };
        if self.device_id.is_empty() {
            return Err(MappingError::EmptyDeviceId {
                layer: layer.to_string(),
            });
        }
        match self.device {
            DeviceType::CasparCg => {
                if self.locator.channel.is_none() {
                    return Err(missing("channel"));
                }
                if self.locator.layer.is_none() {
                    return Err(missing("layer"));
                }
            }
            DeviceType::Atem => {
                if self.locator.mapping_type.is_none() {
                    return Err(missing("mapping_type"));
                }
            }
            DeviceType::Lawo => {
                if self.locator.identifier.as_deref().map_or(true, str::is_empty) {
                    return Err(missing("identifier"));
                }
            }
            DeviceType::Abstract | DeviceType::HttpSend => {}
        }
        Ok(())
    }
}

/// Validate a whole mapping table; the first offending layer wins.
pub fn validate_all(mappings: &Mappings) -> Result<(), MappingError> {
    mappings
        .iter()
        .try_for_each(|(layer, mapping)| mapping.validate(layer))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why a mapping entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    MissingField {
        layer: String,
        device: DeviceType,
        field: &'static str,
    },
    EmptyDeviceId {
        layer: String,
    },
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::MissingField {
                layer,
                device,
                field,
            } => write!(
                f,
                "mapping for layer '{}' ({} device) is missing '{}'",
                layer, device, field
            ),
            MappingError::EmptyDeviceId { layer } => {
                write!(f, "mapping for layer '{}' has an empty device_id", layer)
            }
        }
    }
}

impl std::error::Error for MappingError {}

// ── Routing ───────────────────────────────────────────────────────────────────

/// Mapping that applies to `layer`: its own, or for a background layer
/// without one, the mapping of its `original_layer`.
pub fn route<'a>(mappings: &'a Mappings, layer: &ResolvedLayer) -> Option<&'a Mapping> {
    mappings.get(&layer.layer).or_else(|| {
        if layer.is_background {
            layer
                .original_layer
                .as_deref()
                .and_then(|original| mappings.get(original))
        } else {
            None
        }
    })
}

/// The subset of `state` routed to device `(device_id, device_type)`.
pub fn filter_state(
    state: &ResolvedState,
    mappings: &Mappings,
    device_id: &str,
    device_type: DeviceType,
) -> ResolvedState {
    ResolvedState {
        time: state.time,
        layers: state
            .layers
            .iter()
            .filter(|(_, layer)| {
                route(mappings, layer).map_or(false, |m| m.targets(device_id, device_type))
            })
            .map(|(name, layer)| (name.clone(), layer.clone()))
            .collect(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
