// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Service endpoint map.

use serde::{Deserialize, Serialize};

/// Credential login endpoint.
pub const DEFAULT_LOGIN_URL: &str =
    "https://ucenter.cloud.sengled.com/user/app/customer/v3/AuthenCross.json";
/// Session validation endpoint.
pub const DEFAULT_VALID_SESSION_URL: &str =
    "https://ucenter.cloud.sengled.com/user/app/customer/v2/isSessionTimeout.json";
/// Server discovery endpoint.
pub const DEFAULT_SERVER_DETAILS_URL: &str =
    "https://life2.cloud.sengled.com/life2/server/getServerInfo.json";

/// Runtime-resolved set of service URLs.
///
/// The three authentication endpoints are static. `appserver`, `mqtt` and
/// `mqtt_port` stay `None` until server details are fetched after the first
/// successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMap {
    /// Credential login endpoint.
    pub login: String,
    /// Session validation endpoint.
    pub valid_session: String,
    /// Server discovery endpoint.
    pub server_details: String,
    /// Base URL of the application server (device REST calls).
    pub appserver: Option<String>,
    /// MQTT broker URL.
    pub mqtt: Option<String>,
    /// MQTT broker TLS port as reported by the service.
    pub mqtt_port: Option<u16>,
}

impl Default for EndpointMap {
    fn default() -> Self {
        Self {
            login: DEFAULT_LOGIN_URL.to_string(),
            valid_session: DEFAULT_VALID_SESSION_URL.to_string(),
            server_details: DEFAULT_SERVER_DETAILS_URL.to_string(),
            appserver: None,
            mqtt: None,
            mqtt_port: None,
        }
    }
}

impl EndpointMap {
    /// Creates a map pointing every static endpoint below `base`.
    ///
    /// The paths match the production service, only the origin changes.
    /// Useful for staging environments and local mocks.
    #[must_use]
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            login: format!("{base}/user/app/customer/v3/AuthenCross.json"),
            valid_session: format!("{base}/user/app/customer/v2/isSessionTimeout.json"),
            server_details: format!("{base}/life2/server/getServerInfo.json"),
            ..Self::default()
        }
    }

    /// Looks up an endpoint by its logical name.
    ///
    /// Recognised names are `login`, `validSession`, `serverDetails`,
    /// `appserver`, `mqtt` and `mqttport`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        match name {
            "login" => Some(self.login.clone()),
            "validSession" => Some(self.valid_session.clone()),
            "serverDetails" => Some(self.server_details.clone()),
            "appserver" => self.appserver.clone(),
            "mqtt" => self.mqtt.clone(),
            "mqttport" => self.mqtt_port.map(|port| port.to_string()),
            _ => None,
        }
    }

    /// Returns `true` once server details have been merged in.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.appserver.is_some() && self.mqtt.is_some()
    }

    /// Joins a path relative to the application server.
    ///
    /// Returns `None` while the application server is still unknown.
    #[must_use]
    pub fn appserver_url(&self, uri: &str) -> Option<String> {
        let base = self.appserver.as_deref()?;
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            uri.trim_start_matches('/')
        ))
    }

    pub(crate) fn merge_server_info(
        &mut self,
        appserver: Option<String>,
        mqtt: Option<String>,
        mqtt_port: Option<u16>,
    ) {
        self.appserver = appserver;
        self.mqtt = mqtt;
        self.mqtt_port = mqtt_port;
    }
}
