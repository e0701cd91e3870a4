/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! HTTP-Send device: fires one HTTP request per added or changed layer.
//!
//! Layer content:
//! ```json
//! { "type": "post", "url": "http://gfx.local/api/show", "params": { "name": "lower-third" } }
//! ```
//! Removals are diffed but never sent.  The HTTP client itself is the
//! owner's concern; [`HttpLogReceiver`] only validates and logs requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::{diff_layers, snapshot_layers, ChangeKind, ClaimedLayer, DeviceBehavior, DeviceError, LayerStates};
use crate::clock::Time;
use crate::mapping::DeviceType;
use crate::scheduler::{CommandReceiver, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct HttpSendCommand {
    pub kind: ChangeKind,
    pub layer: String,
    pub content: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Post,
    Get,
}

/// A request described by HTTP-Send layer content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(rename = "type")]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl HttpRequest {
    pub fn from_content(content: &Value) -> Result<Self, TransportError> {
        serde_json::from_value(content.clone()).map_err(|e| {
            TransportError::Unsupported(format!("HTTP-Send content {}: {}", content, e))
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSendBehavior;

impl DeviceBehavior for HttpSendBehavior {
    type State = LayerStates;
    type Command = HttpSendCommand;

    fn device_type(&self) -> DeviceType {
        DeviceType::HttpSend
    }

    fn device_name(&self, device_id: &str) -> String {
        format!("HTTP-Send {}", device_id)
    }

    fn default_state(&self) -> LayerStates {
        LayerStates::new()
    }

    fn convert(&self, _time: Time, claimed: &[ClaimedLayer<'_>]) -> Result<LayerStates, DeviceError> {
        Ok(snapshot_layers(claimed))
    }

    fn diff(&self, old: &LayerStates, new: &LayerStates) -> Vec<HttpSendCommand> {
        diff_layers(
            old,
            new,
            |o, n| o.content != n.content,
            |kind, layer, snap| HttpSendCommand {
                kind,
                layer: layer.to_string(),
                content: snap.content.clone(),
            },
        )
    }

    fn clear_inclusive(&self) -> bool {
        false
    }

    fn should_dispatch(&self, command: &HttpSendCommand) -> bool {
        command.kind != ChangeKind::Removed
    }
}

/// Default receiver: parses each command into an [`HttpRequest`] and logs it.
#[derive(Debug, Clone)]
pub struct HttpLogReceiver {
    device_id: String,
}

impl HttpLogReceiver {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

#[async_trait]
impl CommandReceiver<HttpSendCommand> for HttpLogReceiver {
    async fn send(&self, time: Time, command: HttpSendCommand) -> Result<(), TransportError> {
        let request = HttpRequest::from_content(&command.content)?;
        let params = Value::Object(request.params);
        info!(
            device = %self.device_id,
            time,
            method = ?request.method,
            url = %request.url,
            params = %params,
            "HTTP-Send request"
        );
        Ok(())
    }
}
