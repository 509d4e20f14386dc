// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device operations of the Sengled cloud.
//!
//! - [`DeviceDirectory`] lists devices over the application server and keeps
//!   the account's device cache.
//! - [`DeviceStateChange`] and [`build_commands`] describe control payloads,
//!   published through the MQTT connection by `set_device_state`.

mod command;
mod device;

#[cfg(feature = "mqtt")]
pub use command::set_device_state;
pub use command::{
    COLOR_TEMPERATURE_MARKER, COMMAND_TIME_OFFSET, CommandType, DeviceCommand, DeviceStateChange,
    brightness_percent, build_commands, color_temperature_percent, command_time,
};
pub use device::{DeviceDirectory, DeviceRecord, WIFI_CATEGORY, filter_devices, parse_device_list};
