// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device listing and the per-account device cache.

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{ParseError, Result};
use crate::protocol::{ApiClient, guarded};
use crate::session::Login;

/// Category of the Wi-Fi devices handled by this library.
pub const WIFI_CATEGORY: &str = "wifielement";

const DEVICE_LIST_URI: &str = "device/list.json";

/// A device as listed by the application server.
///
/// Only the fields used for routing are typed. Everything else the service
/// reports (name, attributes, room, firmware...) is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Unique device id; also the MQTT topic segment.
    pub device_uuid: String,
    /// Device category, `wifielement` for Wi-Fi bulbs and plugs.
    #[serde(default)]
    pub category: String,
    /// Remaining fields as reported by the service.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceRecord {
    /// Creates a Wi-Fi device record with no extra fields.
    #[must_use]
    pub fn new(device_uuid: impl Into<String>) -> Self {
        Self {
            device_uuid: device_uuid.into(),
            category: WIFI_CATEGORY.to_string(),
            extra: Map::new(),
        }
    }

    /// Returns `true` for Wi-Fi devices.
    #[must_use]
    pub fn is_wifi(&self) -> bool {
        self.category == WIFI_CATEGORY
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceListResponse {
    #[serde(default)]
    device_list: Vec<DeviceRecord>,
}

/// Device directory of one account.
///
/// The directory owns its cache. Each successful listing replaces the cache
/// wholesale; a listing that yields no result (no session, cancelled or
/// timed out) leaves the cache as it was and returns it.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use sengled_lib::{DeviceDirectory, Login, LoginConfig};
///
/// # async fn example() -> sengled_lib::Result<()> {
/// let login = Arc::new(Login::new(LoginConfig::new("user@example.com", "pw"))?);
/// let directory = DeviceDirectory::new(login);
///
/// for device in directory.get_devices(None).await? {
///     println!("{}", device.device_uuid);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceDirectory {
    api: ApiClient,
    devices: RwLock<Vec<DeviceRecord>>,
}

impl DeviceDirectory {
    /// Creates an empty directory for the given login.
    #[must_use]
    pub fn new(login: Arc<Login>) -> Self {
        Self::with_client(ApiClient::new(login))
    }

    /// Creates an empty directory on top of an existing API client.
    #[must_use]
    pub fn with_client(api: ApiClient) -> Self {
        Self {
            api,
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Returns the API client used for listing.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Returns a snapshot of the cached device list.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().clone()
    }

    /// Lists the account's Wi-Fi devices.
    ///
    /// When `entity_ids` is given only those devices are kept.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CloseRequested`] after the login was closed,
    /// and request or decode errors that survive retrying.
    pub async fn get_devices(&self, entity_ids: Option<&[&str]>) -> Result<Vec<DeviceRecord>> {
        let login = self.api.login();
        let args = json!({ "entity_ids": entity_ids });
        let fetched = guarded(
            "get_devices",
            &args,
            login.config().operation_timeout(),
            self.fetch(entity_ids),
        )
        .await?;

        match fetched.flatten() {
            Some(devices) => {
                tracing::debug!(count = devices.len(), "Updated device cache");
                *self.devices.write() = devices.clone();
                Ok(devices)
            }
            None => {
                tracing::debug!("Device listing produced no result, using cache");
                Ok(self.devices())
            }
        }
    }

    async fn fetch(&self, entity_ids: Option<&[&str]>) -> Result<Option<Vec<DeviceRecord>>> {
        let Some(response) = self
            .api
            .request(Method::POST, DEVICE_LIST_URI, Some(&json!({})), None)
            .await?
        else {
            return Ok(None);
        };

        let listing: DeviceListResponse = response.parse()?;
        Ok(Some(filter_devices(listing.device_list, entity_ids)))
    }
}

/// Keeps Wi-Fi devices, restricted to `entity_ids` when given.
#[must_use]
pub fn filter_devices(devices: Vec<DeviceRecord>, entity_ids: Option<&[&str]>) -> Vec<DeviceRecord> {
    devices
        .into_iter()
        .filter(DeviceRecord::is_wifi)
        .filter(|device| {
            entity_ids.is_none_or(|ids| ids.contains(&device.device_uuid.as_str()))
        })
        .collect()
}

/// Decodes a device listing body.
///
/// # Errors
///
/// Returns error if the body is not a JSON object with a device list.
pub fn parse_device_list(body: &str) -> std::result::Result<Vec<DeviceRecord>, ParseError> {
    let listing: DeviceListResponse = serde_json::from_str(body)?;
    Ok(listing.device_list)
}
