// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device control commands.
//!
//! Devices are controlled by publishing a JSON array of commands to
//! `wifielement/{id}/update`. Each requested change becomes one entry:
//!
//! ```text
//! [{"dn":"D1","type":"switch","value":"1","time":"..."},
//!  {"dn":"D1","type":"brightness","value":"50","time":"..."}]
//! ```

use serde::{Deserialize, Serialize};

/// Offset subtracted from the Unix time in the `time` field.
pub const COMMAND_TIME_OFFSET: i64 = 1_577_858_400;

/// Color entry the firmware expects alongside a color temperature change.
pub const COLOR_TEMPERATURE_MARKER: &str = "255:45:41";

/// Kelvin value mapped to 100 %.
const MAX_KELVIN: f64 = 6500.0;

/// Attribute a command changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandType {
    /// Power, `"1"` or `"0"`.
    Switch,
    /// Brightness in percent.
    Brightness,
    /// Color as `r:g:b`.
    Color,
    /// Color temperature in percent of 6500 K.
    ColorTemperature,
}

/// One entry of an update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// Target device id.
    pub dn: String,
    /// Attribute to change.
    #[serde(rename = "type")]
    pub kind: CommandType,
    /// New value, always a string on the wire.
    pub value: String,
    /// Command time, see [`command_time`].
    pub time: String,
}

/// Requested changes to a device's state.
///
/// Unset fields are left as they are on the device.
///
/// # Examples
///
/// ```
/// use sengled_lib::api::{DeviceStateChange, build_commands};
///
/// let change = DeviceStateChange::new().power_on(true).brightness(128);
/// let commands = build_commands("D1", &change, "100");
/// assert_eq!(commands.len(), 2);
/// assert_eq!(commands[1].value, "50");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStateChange {
    power_on: Option<bool>,
    brightness: Option<u8>,
    color: Option<(u8, u8, u8)>,
    color_temperature: Option<u32>,
}

impl DeviceStateChange {
    /// Creates an empty change.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns the device on or off.
    #[must_use]
    pub fn power_on(mut self, on: bool) -> Self {
        self.power_on = Some(on);
        self
    }

    /// Sets the brightness on a 0-255 scale.
    #[must_use]
    pub fn brightness(mut self, value: u8) -> Self {
        self.brightness = Some(value);
        self
    }

    /// Sets the RGB color.
    #[must_use]
    pub fn color(mut self, red: u8, green: u8, blue: u8) -> Self {
        self.color = Some((red, green, blue));
        self
    }

    /// Sets the color temperature in kelvin (2500-6500 on current bulbs).
    #[must_use]
    pub fn color_temperature(mut self, kelvin: u32) -> Self {
        self.color_temperature = Some(kelvin);
        self
    }

    /// Returns `true` if no change is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Converts a 0-255 brightness to percent.
#[must_use]
pub fn brightness_percent(value: u8) -> u32 {
    percent(f64::from(value) / 255.0)
}

/// Converts a kelvin color temperature to percent of 6500 K.
#[must_use]
pub fn color_temperature_percent(kelvin: u32) -> u32 {
    percent(f64::from(kelvin) / MAX_KELVIN)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent(ratio: f64) -> u32 {
    (ratio * 100.0).round_ties_even() as u32
}

/// Current value of the `time` field.
#[must_use]
pub fn command_time() -> String {
    (chrono::Utc::now().timestamp() - COMMAND_TIME_OFFSET).to_string()
}

/// Builds the update payload for `entity_id`.
///
/// Entries are ordered switch, brightness, color, color temperature, followed
/// by the color marker when a color temperature is set.
#[must_use]
pub fn build_commands(entity_id: &str, change: &DeviceStateChange, time: &str) -> Vec<DeviceCommand> {
    let entry = |kind, value: String| DeviceCommand {
        dn: entity_id.to_string(),
        kind,
        value,
        time: time.to_string(),
    };

    let mut commands = Vec::new();
    if let Some(on) = change.power_on {
        commands.push(entry(CommandType::Switch, if on { "1" } else { "0" }.to_string()));
    }
    if let Some(brightness) = change.brightness {
        commands.push(entry(
            CommandType::Brightness,
            brightness_percent(brightness).to_string(),
        ));
    }
    if let Some((r, g, b)) = change.color {
        commands.push(entry(CommandType::Color, format!("{r}:{g}:{b}")));
    }
    if let Some(kelvin) = change.color_temperature {
        commands.push(entry(
            CommandType::ColorTemperature,
            color_temperature_percent(kelvin).to_string(),
        ));
        commands.push(entry(CommandType::Color, COLOR_TEMPERATURE_MARKER.to_string()));
    }
    commands
}

/// Publishes a state change to a device.
///
/// Returns whether the broker connection acknowledged the publish locally.
/// An empty change publishes nothing and returns `false`.
///
/// # Errors
///
/// Returns error if the payload cannot be encoded or the broker cannot be
/// reached.
#[cfg(feature = "mqtt")]
pub async fn set_device_state(
    mqtt: &crate::protocol::MqttManager,
    entity_id: &str,
    change: &DeviceStateChange,
) -> crate::Result<bool> {
    if change.is_empty() {
        tracing::debug!(device = %entity_id, "No state change requested");
        return Ok(false);
    }

    let commands = build_commands(entity_id, change, &command_time());
    let payload = serde_json::to_vec(&commands)?;
    let topic = crate::protocol::update_topic(entity_id);
    tracing::debug!(
        device = %entity_id,
        topic = %topic,
        commands = commands.len(),
        "Updating device state"
    );
    mqtt.publish(&topic, payload).await
}
