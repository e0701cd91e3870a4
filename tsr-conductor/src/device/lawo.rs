/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Lawo audio console over Ember+ node paths.
//!
//! A `"lawosource"` layer sets attributes of one console source:
//!
//! ```text
//!  mapping { identifier: "Mic 1" }         sources_path = "Sapphire.Sources"
//!  content.attributes["Fader/Motor dB Value"] = { value: -6.0, transition_duration: 500 }
//!        │
//!        ▼
//!  node path  "Sapphire.Sources.Mic 1.Fader.Motor dB Value"
//! ```
//!
//! The diff works on node paths, not layers: only nodes whose value or
//! transition changed are set again.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{ClaimedLayer, DeviceBehavior, DeviceError, DeviceSettings};
use crate::clock::Time;
use crate::mapping::DeviceType;
use crate::scheduler::{CommandReceiver, TransportError};

/// Content type handled by this device.
pub const CONTENT_TYPE_SOURCE: &str = "lawosource";

/// Attribute key of a source's fader level.
pub const FADER_LEVEL_KEY: &str = "Fader/Motor dB Value";

/// One console parameter the device should hold.
#[derive(Debug, Clone, PartialEq)]
pub struct LawoNode {
    pub key: String,
    pub identifier: String,
    pub value: Value,
    /// Ramp duration in ms; `None` sets the value at once.
    pub transition_duration: Option<Time>,
}

/// Node path → node.
pub type LawoState = BTreeMap<String, LawoNode>;

#[derive(Debug, Clone, PartialEq)]
pub enum LawoCommand {
    Set { path: String, node: LawoNode },
    Removed { path: String },
}

#[derive(Debug, Clone, Default)]
pub struct LawoBehavior {
    sources_path: Option<String>,
}

impl LawoBehavior {
    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self {
            sources_path: settings.sources_path.clone(),
        }
    }

    /// `[sources_path, identifier, key]` joined by `.`, empty parts skipped.
    /// The first `/` of the attribute key becomes a `.`.
    pub fn node_path(&self, identifier: &str, key: &str) -> String {
        let attribute = key.replacen('/', ".", 1);
        [self.sources_path.as_deref(), Some(identifier), Some(attribute.as_str())]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl DeviceBehavior for LawoBehavior {
    type State = LawoState;
    type Command = LawoCommand;

    fn device_type(&self) -> DeviceType {
        DeviceType::Lawo
    }

    fn device_name(&self, device_id: &str) -> String {
        format!("Lawo {}", device_id)
    }

    fn default_state(&self) -> LawoState {
        LawoState::new()
    }

    fn convert(&self, _time: Time, claimed: &[ClaimedLayer<'_>]) -> Result<LawoState, DeviceError> {
        let mut state = LawoState::new();
        for c in claimed {
            let Some(identifier) = c.mapping.locator.identifier.as_deref() else {
                continue;
            };
            if c.layer.content_type() != Some(CONTENT_TYPE_SOURCE) {
                continue;
            }
            let Some(attributes) = c.layer.attributes() else {
                continue;
            };
            for (key, attribute) in attributes {
                let value = attribute.get("value").cloned().ok_or_else(|| DeviceError::Convert {
                    layer: c.name.to_string(),
                    reason: format!("attribute '{}' has no value", key),
                })?;
                let transition_duration = attribute.get("transition_duration").and_then(Value::as_i64);
                state.insert(
                    self.node_path(identifier, key),
                    LawoNode {
                        key: key.clone(),
                        identifier: identifier.to_string(),
                        value,
                        transition_duration,
                    },
                );
            }
        }
        Ok(state)
    }

    fn diff(&self, old: &LawoState, new: &LawoState) -> Vec<LawoCommand> {
        let mut commands: Vec<LawoCommand> = new
            .iter()
            .filter(|(path, node)| old.get(*path) != Some(*node))
            .map(|(path, node)| LawoCommand::Set {
                path: path.clone(),
                node: node.clone(),
            })
            .collect();
        commands.extend(
            old.keys()
                .filter(|path| !new.contains_key(*path))
                .map(|path| LawoCommand::Removed { path: path.clone() }),
        );
        commands
    }

    fn clear_inclusive(&self) -> bool {
        false
    }
}

/// Default receiver: logs what would be sent to the console.
#[derive(Debug, Clone)]
pub struct LawoLogReceiver {
    device_id: String,
    ramp_motor_function_path: Option<String>,
}

impl LawoLogReceiver {
    pub fn new(device_id: impl Into<String>, ramp_motor_function_path: Option<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ramp_motor_function_path,
        }
    }
}

#[async_trait]
impl CommandReceiver<LawoCommand> for LawoLogReceiver {
    async fn send(&self, time: Time, command: LawoCommand) -> Result<(), TransportError> {
        match command {
            LawoCommand::Set { path, node } => {
                let ramp = node.transition_duration.filter(|&d| d > 0);
                match (node.key.as_str(), ramp) {
                    (FADER_LEVEL_KEY, Some(duration)) => {
                        let function = self.ramp_motor_function_path.as_deref().ok_or_else(|| {
                            TransportError::Rejected(
                                "timed fader move without ramp_motor_function_path".to_string(),
                            )
                        })?;
                        info!(device = %self.device_id, time, function, identifier = %node.identifier,
                              value = %node.value, duration, "Ember+ invoke");
                    }
                    _ => {
                        info!(device = %self.device_id, time, path = %path, value = %node.value, "Ember+ set");
                    }
                }
            }
            LawoCommand::Removed { path } => {
                info!(device = %self.device_id, time, path = %path, "Ember+ node released");
            }
        }
        Ok(())
    }
}
