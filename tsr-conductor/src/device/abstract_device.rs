/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Abstract device: no wire protocol, one command per layer change.
//!
//! Useful as a placeholder in rundowns and as the simplest reference for a
//! [`DeviceBehavior`].

use serde_json::Value;

use super::{diff_layers, snapshot_layers, ChangeKind, ClaimedLayer, DeviceBehavior, DeviceError, LayerStates};
use crate::clock::Time;
use crate::mapping::DeviceType;

#[derive(Debug, Clone, PartialEq)]
pub struct AbstractCommand {
    pub kind: ChangeKind,
    pub layer: String,
    pub content: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AbstractBehavior;

impl DeviceBehavior for AbstractBehavior {
    type State = LayerStates;
    type Command = AbstractCommand;

    fn device_type(&self) -> DeviceType {
        DeviceType::Abstract
    }

    fn device_name(&self, device_id: &str) -> String {
        format!("Abstract {}", device_id)
    }

    fn default_state(&self) -> LayerStates {
        LayerStates::new()
    }

    fn convert(&self, _time: Time, claimed: &[ClaimedLayer<'_>]) -> Result<LayerStates, DeviceError> {
        Ok(snapshot_layers(claimed))
    }

    /// A layer counts as changed only when another object won it.
    fn diff(&self, old: &LayerStates, new: &LayerStates) -> Vec<AbstractCommand> {
        diff_layers(
            old,
            new,
            |o, n| o.id != n.id,
            |kind, layer, snap| AbstractCommand {
                kind,
                layer: layer.to_string(),
                content: snap.content.clone(),
            },
        )
    }

    /// Full resync: a command due at the resolve instant is replaced too.
    fn clear_inclusive(&self) -> bool {
        true
    }
}
