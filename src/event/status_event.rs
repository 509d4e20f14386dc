// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A device status report folded into one event.
///
/// The broker sends a list of `{type, value, time}` entries per report.
/// Each entry becomes one attribute; the timestamp is taken from the first
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Device the report belongs to (second topic segment).
    pub device_id: String,
    /// Report time as sent by the device.
    #[serde(rename = "time")]
    pub timestamp: i64,
    /// Attribute name to value.
    pub attributes: BTreeMap<String, String>,
}

impl StatusEvent {
    /// Creates an event without attributes.
    #[must_use]
    pub fn new(device_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            attributes: BTreeMap::new(),
        }
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Power state from the `switch` attribute, if reported.
    #[must_use]
    pub fn is_on(&self) -> Option<bool> {
        self.attribute("switch").map(|v| v == "1")
    }
}
