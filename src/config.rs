// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Account configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::RetryPolicy;
use crate::session::EndpointMap;

/// Configuration for one Sengled cloud account.
///
/// # Examples
///
/// ```
/// use sengled_lib::LoginConfig;
/// use std::time::Duration;
///
/// let config = LoginConfig::new("user@example.com", "password")
///     .with_output_root("/var/lib/sengled")
///     .with_timeout(Duration::from_secs(10));
///
/// assert_eq!(config.email(), "user@example.com");
/// ```
#[derive(Clone)]
pub struct LoginConfig {
    email: String,
    password: String,
    output_root: PathBuf,
    client_uuid: Option<String>,
    endpoints: EndpointMap,
    timeout: Duration,
    operation_timeout: Duration,
    retry: RetryPolicy,
}

impl LoginConfig {
    /// Default root directory for persisted state.
    pub const DEFAULT_OUTPUT_ROOT: &'static str = "temp";
    /// Default timeout of a single HTTP request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default timeout of a guarded operation, retries included.
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a configuration for the given credentials.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            output_root: PathBuf::from(Self::DEFAULT_OUTPUT_ROOT),
            client_uuid: None,
            endpoints: EndpointMap::default(),
            timeout: Self::DEFAULT_TIMEOUT,
            operation_timeout: Self::DEFAULT_OPERATION_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the directory below which `.storage/` holds the cookie file.
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Sets the client UUID presented to the service.
    ///
    /// Without one, a random UUID is generated per login instance.
    #[must_use]
    pub fn with_client_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.client_uuid = Some(uuid.into());
        self
    }

    /// Replaces the static endpoint map.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: EndpointMap) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Sets the timeout of a single HTTP request.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the timeout after which a guarded operation yields no result.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the retry policy of the request pipeline.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the account email.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Returns the output root.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Returns the configured client UUID, if any.
    #[must_use]
    pub fn client_uuid(&self) -> Option<&str> {
        self.client_uuid.as_deref()
    }

    /// Returns the static endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointMap {
        &self.endpoints
    }

    /// Returns the HTTP request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the guarded operation timeout.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig")
            .field("email", &crate::redact::hide_email(&self.email))
            .field("password", &crate::redact::hide_password(&self.password))
            .field("output_root", &self.output_root)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = LoginConfig::new("user@example.com", "pw");
        assert_eq!(config.output_root(), Path::new("temp"));
        assert!(config.client_uuid().is_none());
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.operation_timeout(), Duration::from_secs(60));
        assert_eq!(config.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn builder_chain() {
        let config = LoginConfig::new("user@example.com", "pw")
            .with_output_root("/tmp/x")
            .with_client_uuid("ABCDEF")
            .with_endpoints(EndpointMap::with_base("http://localhost:1"))
            .with_timeout(Duration::from_secs(2))
            .with_operation_timeout(Duration::from_secs(3));

        assert_eq!(config.output_root(), Path::new("/tmp/x"));
        assert_eq!(config.client_uuid(), Some("ABCDEF"));
        assert!(config.endpoints().login.starts_with("http://localhost:1/"));
        assert_eq!(config.timeout(), Duration::from_secs(2));
        assert_eq!(config.operation_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn debug_hides_credentials() {
        let config = LoginConfig::new("alice@example.com", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("alice@"));
    }
}
