// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Events delivered by the MQTT connection.
//!
//! The broker task parses inbound traffic into [`MqttEvent`] values and
//! enqueues them on a bounded channel. A single consumer drains the channel
//! in arrival order.
//!
//! # Examples
//!
//! ```
//! use sengled_lib::event::{MqttEvent, StatusEvent};
//!
//! fn handle(event: MqttEvent) {
//!     match event {
//!         MqttEvent::Status(status) => {
//!             println!("{} switch={:?}", status.device_id, status.attribute("switch"));
//!         }
//!         MqttEvent::Disconnected => println!("connection lost"),
//!         _ => {}
//!     }
//! }
//! ```

mod mqtt_event;
mod status_event;

pub use mqtt_event::{ConnectionState, MqttEvent};
pub use status_event::StatusEvent;
