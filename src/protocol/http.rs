// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authenticated request pipeline for the application server.

use std::sync::Arc;

use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::error::{Error, ParseError, Result};
use crate::protocol::with_retry;
use crate::redact::hide_email;
use crate::session::Login;

/// Response from the application server.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    body: String,
}

impl ApiResponse {
    /// Creates a response with the given status and body.
    #[must_use]
    pub fn new(status: u16, body: String) -> Self {
        Self { status, body }
    }

    /// Returns the HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the raw response body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parses the response as a specific type.
    ///
    /// # Errors
    ///
    /// Returns error if the JSON cannot be parsed into the target type.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, ParseError> {
        serde_json::from_str(&self.body).map_err(Into::into)
    }
}

/// Issues requests against the application server on behalf of a login.
///
/// Every request runs through the same steps:
///
/// 1. ensure a valid session (validating, and logging in again if needed)
/// 2. send the request with the session cookies
/// 3. classify the status code
/// 4. retry rate-limit and connection failures with exponential backoff
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use reqwest::Method;
/// use sengled_lib::{Login, LoginConfig};
/// use sengled_lib::protocol::ApiClient;
///
/// # async fn example() -> sengled_lib::Result<()> {
/// let login = Arc::new(Login::new(LoginConfig::new("user@example.com", "pw"))?);
/// let api = ApiClient::new(login);
/// let response = api
///     .request(Method::POST, "device/list.json", Some(&serde_json::json!({})), None)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ApiClient {
    login: Arc<Login>,
}

impl ApiClient {
    /// Creates a client for the given login.
    #[must_use]
    pub fn new(login: Arc<Login>) -> Self {
        Self { login }
    }

    /// Returns the login this client acts for.
    #[must_use]
    pub fn login(&self) -> &Arc<Login> {
        &self.login
    }

    /// Sends a request to `{appserver}/{uri}`.
    ///
    /// Returns `Ok(None)` when no session could be established (the service
    /// rejected the credentials).
    ///
    /// # Errors
    ///
    /// - [`Error::Login`] on HTTP 401; the session is marked as failed so the
    ///   next request logs in again
    /// - [`Error::TooManyRequests`] or [`Error::Connection`] once retries are
    ///   exhausted
    /// - [`Error::Api`] for other client errors
    /// - [`Error::CloseRequested`] after the login was closed
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        data: Option<&Value>,
        query: Option<&[(&str, &str)]>,
    ) -> Result<Option<ApiResponse>> {
        let policy = self.login.config().retry_policy();
        with_retry(policy, uri, move || {
            let method = method.clone();
            async move { self.attempt(method, uri, data, query).await }
        })
        .await
    }

    async fn attempt(
        &self,
        method: Method,
        uri: &str,
        data: Option<&Value>,
        query: Option<&[(&str, &str)]>,
    ) -> Result<Option<ApiResponse>> {
        if !self.login.ensure_session().await? {
            tracing::debug!(uri, "No session available, skipping request");
            return Ok(None);
        }

        let url = self.build_url(uri, query)?;
        let response = self.login.send(method.clone(), url.clone(), data).await?;
        let status = response.status();
        self.login.record_api_call();

        tracing::debug!(
            account = %hide_email(self.login.email()),
            method = %method,
            url = %url,
            status = status.as_u16(),
            "API request completed"
        );

        if status == StatusCode::UNAUTHORIZED {
            self.login.mark_login_failed();
        }
        classify_status(status)?;

        let body = response.text().await?;
        Ok(Some(ApiResponse::new(status.as_u16(), body)))
    }

    /// Builds the absolute URL for `uri` with optional query parameters.
    fn build_url(&self, uri: &str, query: Option<&[(&str, &str)]>) -> Result<Url> {
        let base = self
            .login
            .endpoints()
            .appserver_url(uri)
            .ok_or_else(|| Error::Connection("application server address unknown".to_string()))?;

        let url = match query {
            Some(params) if !params.is_empty() => {
                let encoded: Vec<String> = params
                    .iter()
                    .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                    .collect();
                format!("{base}?{}", encoded.join("&"))
            }
            _ => base,
        };

        Url::parse(&url).map_err(|e| Error::InvalidConfig(format!("invalid URL {url}: {e}")))
    }
}

/// Maps an HTTP status code onto the error taxonomy.
///
/// # Errors
///
/// - 401: [`Error::Login`]
/// - 429: [`Error::TooManyRequests`]
/// - 408 and 5xx: [`Error::Connection`]
/// - other 4xx: [`Error::Api`]
pub fn classify_status(status: StatusCode) -> Result<()> {
    let reason = status.canonical_reason().unwrap_or("Unknown").to_string();
    match status.as_u16() {
        401 => Err(Error::Login(reason)),
        429 => Err(Error::TooManyRequests(reason)),
        408 | 500..=599 => Err(Error::Connection(format!(
            "HTTP {} - {reason}",
            status.as_u16()
        ))),
        code if code >= 400 => Err(Error::Api {
            status: code,
            reason,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoginConfig;
    use crate::session::EndpointMap;

    fn client() -> ApiClient {
        let config = LoginConfig::new("user@example.com", "pw")
            .with_endpoints(EndpointMap::with_base("http://127.0.0.1:9"));
        ApiClient::new(Arc::new(Login::new(config).unwrap()))
    }

    #[test]
    fn classify_success() {
        assert!(classify_status(StatusCode::OK).is_ok());
        assert!(classify_status(StatusCode::NO_CONTENT).is_ok());
        assert!(classify_status(StatusCode::FOUND).is_ok());
    }

    #[test]
    fn classify_unauthorized_as_login() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            Err(Error::Login(_))
        ));
    }

    #[test]
    fn classify_rate_limit() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS).unwrap_err();
        assert!(matches!(err, Error::TooManyRequests(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn classify_server_errors_as_connection() {
        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY, StatusCode::REQUEST_TIMEOUT] {
            let err = classify_status(status).unwrap_err();
            assert!(matches!(err, Error::Connection(_)));
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn classify_other_client_errors_as_api() {
        let err = classify_status(StatusCode::NOT_FOUND).unwrap_err();
        assert!(matches!(err, Error::Api { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn build_url_requires_appserver() {
        let err = client().build_url("device/list.json", None).unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn response_parse() {
        let response = ApiResponse::new(200, r#"{"deviceList":[]}"#.to_string());
        let value: Value = response.parse().unwrap();
        assert_eq!(value["deviceList"], serde_json::json!([]));
        assert_eq!(response.status(), 200);
    }
}
