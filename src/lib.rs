// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sengled Lib - A Rust library to control Sengled Wi-Fi devices through the
//! Sengled cloud.
//!
//! # Features
//!
//! - **Session management**: credential login, validated cookie reuse for
//!   24 hours, automatic re-authentication
//! - **Request pipeline**: retry with exponential backoff on rate limiting
//!   and connection failures
//! - **Device listing**: Wi-Fi devices of an account, with a cached fallback
//! - **Real-time updates**: device status reports over MQTT (WebSocket/TLS)
//! - **Control**: power, brightness, color and color temperature
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sengled_lib::{DeviceDirectory, DeviceStateChange, Login, LoginConfig};
//! use sengled_lib::event::MqttEvent;
//! use sengled_lib::protocol::{MqttConfig, MqttManager};
//!
//! #[tokio::main]
//! async fn main() -> sengled_lib::Result<()> {
//!     let config = LoginConfig::new("user@example.com", "password")
//!         .with_output_root("/var/lib/sengled");
//!     let login = Arc::new(Login::new(config)?);
//!
//!     // Reuses the stored cookie when it is still valid
//!     if !login.login(false).await? {
//!         eprintln!("login rejected");
//!         return Ok(());
//!     }
//!
//!     let directory = DeviceDirectory::new(Arc::clone(&login));
//!     let devices = directory.get_devices(None).await?;
//!
//!     let (mqtt, mut events) = MqttManager::new(Arc::clone(&login), MqttConfig::default())?;
//!     mqtt.connect(devices.clone()).await?;
//!
//!     if let Some(device) = devices.first() {
//!         let change = DeviceStateChange::new().power_on(true).brightness(128);
//!         sengled_lib::api::set_device_state(&mqtt, &device.device_uuid, &change).await?;
//!     }
//!
//!     while let Some(event) = events.recv().await {
//!         if let MqttEvent::Status(status) = event {
//!             println!("{} -> {:?}", status.device_id, status.attributes);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//!
//! The library logs through [`tracing`] and never installs a subscriber.
//! Emails, passwords, cookies and serial numbers are redacted before they
//! reach a log record (see [`redact`]).

pub mod api;
mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod redact;
pub mod session;

pub use api::{DeviceDirectory, DeviceRecord, DeviceStateChange};
pub use config::LoginConfig;
#[cfg(feature = "mqtt")]
pub use error::MqttError;
pub use error::{Error, ParseError, Result};
pub use protocol::{ApiClient, RetryPolicy};
pub use session::{CookieFile, EndpointMap, Login};
