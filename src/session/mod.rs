// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session state and the login state machine.
//!
//! A [`Login`] owns everything authenticated about one account: the HTTP
//! connector, the cookie jar and its file, the endpoint map, and the status
//! and statistics counters.
//!
//! ```text
//! NoSession -> Validating -> Valid                       (cookie reuse)
//! NoSession -> Validating -> Invalid -> Authenticating -> Valid | Failed
//! ```

mod cookie;
mod endpoints;
mod login;

pub use cookie::{CookieFile, CookieJar, DOMAIN_TAG, SESSION_COOKIE, StoredCookie};
pub use endpoints::{
    DEFAULT_LOGIN_URL, DEFAULT_SERVER_DETAILS_URL, DEFAULT_VALID_SESSION_URL, EndpointMap,
};
pub use login::Login;

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::Result;

/// User agent presented to the cloud service.
pub const CLIENT_USER_AGENT: &str = "okhttp/4.9.2";

/// Status flags of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Set by a successful credential login, cleared by reset and by any
    /// HTTP 401 answer.
    pub login_successful: bool,
}

/// Counters kept across resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Time of the last successful credential login.
    pub login_timestamp: Option<DateTime<Utc>>,
    /// Number of API calls answered by the service.
    pub api_calls: u64,
}

/// Mutable part of a login, guarded by the login's lock.
#[derive(Debug)]
pub(crate) struct Session {
    pub client: Client,
    pub endpoints: EndpointMap,
    pub customer_id: Option<String>,
    pub status: SessionStatus,
    pub stats: SessionStats,
    pub cookies: CookieJar,
}

/// The fixed header set sent with every request.
#[must_use]
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("*"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Builds the HTTPS connector of a session.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .default_headers(default_headers())
        .timeout(timeout)
        .build()?)
}

/// Reads an integer field that the service sends either as a number or as
/// a numeric string.
pub(crate) fn json_int(body: &Value, key: &str) -> Option<i64> {
    match body.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a string field, accepting numbers as well.
pub(crate) fn json_string(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_int_accepts_number_and_string() {
        let body = json!({"a": 200, "b": "0", "c": "x", "d": null});
        assert_eq!(json_int(&body, "a"), Some(200));
        assert_eq!(json_int(&body, "b"), Some(0));
        assert_eq!(json_int(&body, "c"), None);
        assert_eq!(json_int(&body, "d"), None);
        assert_eq!(json_int(&body, "missing"), None);
    }

    #[test]
    fn json_string_accepts_number() {
        let body = json!({"customerId": 12345});
        assert_eq!(json_string(&body, "customerId").as_deref(), Some("12345"));
    }

    #[test]
    fn default_header_set() {
        let headers = default_headers();
        assert_eq!(headers[USER_AGENT], CLIENT_USER_AGENT);
        assert_eq!(headers[ACCEPT], "*/*");
        assert_eq!(headers[ACCEPT_LANGUAGE], "*");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }
}
