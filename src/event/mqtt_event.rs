// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection lifecycle and inbound message events.

use super::StatusEvent;

/// State of the broker connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The broker accepted the connection.
    Connected,
    /// The broker refused the connection.
    Error,
}

/// Event emitted by the MQTT connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    /// The broker accepted the connection and device topics were subscribed.
    Connected,

    /// A device reported its state.
    Status(StatusEvent),

    /// The connection ended, either closed by the broker, lost, or
    /// disconnected locally.
    Disconnected,

    /// The broker refused the connection.
    ConnectionRefused {
        /// Reason reported by the broker.
        reason: String,
    },
}

impl MqttEvent {
    /// Returns `true` for connection lifecycle events.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        !matches!(self, Self::Status(_))
    }

    /// Returns the status payload, if this is a status event.
    #[must_use]
    pub fn as_status(&self) -> Option<&StatusEvent> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }
}
