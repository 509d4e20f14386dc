// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic naming, status message parsing and per-topic callback routing.
//!
//! ```text
//! wifielement/D1/status   [{"type":"switch","value":"1","time":100}, ...]
//!              ↓
//!      parse_status_message()
//!              ↓
//! StatusEvent { device_id: "D1", timestamp: 100, attributes: {switch: "1"} }
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use rumqttc::QoS;
use serde::Deserialize;
use serde_json::Value;

use crate::api::DeviceRecord;
use crate::error::ParseError;
use crate::event::StatusEvent;

/// Root segment of every device topic.
pub const TOPIC_ROOT: &str = "wifielement";

/// Topic a device reports its status on.
#[must_use]
pub fn status_topic(device_uuid: &str) -> String {
    format!("{TOPIC_ROOT}/{device_uuid}/status")
}

/// Topic a device receives control commands on.
#[must_use]
pub fn update_topic(entity_id: &str) -> String {
    format!("{TOPIC_ROOT}/{entity_id}/update")
}

/// Status subscriptions for a device list, one per device at QoS 2.
#[must_use]
pub fn status_subscriptions(devices: &[DeviceRecord]) -> Vec<(String, QoS)> {
    devices
        .iter()
        .map(|device| (status_topic(&device.device_uuid), QoS::ExactlyOnce))
        .collect()
}

/// Checks a topic against an MQTT subscription filter.
///
/// `+` matches exactly one level, a trailing `#` matches any remaining
/// levels (including none).
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusEntry {
    #[serde(rename = "type")]
    kind: String,
    value: Value,
    #[serde(default)]
    time: Value,
}

/// Parses a message received on a device status topic.
///
/// Returns `Ok(None)` for topics outside `wifielement/`.
///
/// # Errors
///
/// Returns error if the topic has no device segment or the payload is not a
/// non-empty JSON array of `{type, value, time}` entries.
pub fn parse_status_message(topic: &str, payload: &[u8]) -> Result<Option<StatusEvent>, ParseError> {
    let mut levels = topic.split('/');
    if levels.next() != Some(TOPIC_ROOT) {
        return Ok(None);
    }
    let device_id = levels
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ParseError::UnexpectedFormat(format!("no device in topic {topic}")))?;

    let entries: Vec<StatusEntry> = serde_json::from_slice(payload)?;
    let first = entries
        .first()
        .ok_or_else(|| ParseError::UnexpectedFormat("empty status report".to_string()))?;
    let timestamp = match &first.time {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ParseError::InvalidValue {
        field: "time".to_string(),
        message: format!("expected an integer, got {}", first.time),
    })?;

    let mut event = StatusEvent::new(device_id, timestamp);
    for entry in entries {
        let value = match entry.value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        event.attributes.insert(entry.kind, value);
    }
    Ok(Some(event))
}

/// Callback invoked with the topic and raw payload of a matching message.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Routes inbound messages to callbacks registered per topic filter.
#[derive(Default)]
pub struct CallbackRouter {
    routes: RwLock<Vec<(String, MessageCallback)>>,
}

impl CallbackRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for a topic filter.
    pub fn register(&self, filter: impl Into<String>, callback: MessageCallback) {
        let filter = filter.into();
        tracing::debug!(filter = %filter, "Registering topic callback");
        self.routes.write().push((filter, callback));
    }

    /// Removes every callback registered for `filter`.
    ///
    /// Returns the number of callbacks removed.
    pub fn unregister(&self, filter: &str) -> usize {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|(f, _)| f != filter);
        before - routes.len()
    }

    /// Invokes every callback whose filter matches `topic`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn route(&self, topic: &str, payload: &[u8]) -> usize {
        let matching: Vec<MessageCallback> = self
            .routes
            .read()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in &matching {
            callback(topic, payload);
        }
        matching.len()
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Returns `true` if no callback is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl std::fmt::Debug for CallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let filters: Vec<String> = self.routes.read().iter().map(|(f, _)| f.clone()).collect();
        f.debug_struct("CallbackRouter")
            .field("filters", &filters)
            .finish()
    }
}
