// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Login state machine for one Sengled cloud account.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use reqwest::header::COOKIE;
use reqwest::{Method, Response, Url};
use serde_json::{Value, json};

use super::{
    CookieFile, EndpointMap, SESSION_COOKIE, Session, SessionStats, SessionStatus, build_client,
    json_int, json_string,
};
use crate::config::LoginConfig;
use crate::error::{Error, Result};
use crate::redact::{hide_email, obfuscate};

/// Validity window of a credential login, in hours.
const SESSION_LIFETIME_HOURS: i64 = 24;

/// Authenticated state for one account.
///
/// A `Login` is meant to be shared behind an `Arc` by every component that
/// talks to the cloud on behalf of the account. Only one `Login` per account
/// should exist in a process since they would share the same cookie file.
///
/// Locks are never held across network calls, so concurrent callers may each
/// trigger a redundant login. Hosts that need a single login at a time must
/// serialize calls themselves.
///
/// # Examples
///
/// ```no_run
/// use sengled_lib::{Login, LoginConfig};
///
/// # async fn example() -> sengled_lib::Result<()> {
/// let login = Login::new(LoginConfig::new("user@example.com", "password"))?;
/// if login.login(false).await? {
///     println!("customer {:?}", login.customer_id());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Login {
    config: LoginConfig,
    client_uuid: String,
    cookie_file: CookieFile,
    session: Mutex<Session>,
    closed: AtomicBool,
}

impl Login {
    /// Creates an unauthenticated login for the configured account.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTPS connector cannot be created.
    pub fn new(config: LoginConfig) -> Result<Self> {
        let client_uuid = config.client_uuid().map_or_else(
            || uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
            str::to_string,
        );
        let cookie_file = CookieFile::for_account(config.output_root(), config.email());
        let session = Session {
            client: build_client(config.timeout())?,
            endpoints: config.endpoints().clone(),
            customer_id: None,
            status: SessionStatus::default(),
            stats: SessionStats::default(),
            cookies: super::CookieJar::new(),
        };

        Ok(Self {
            config,
            client_uuid,
            cookie_file,
            session: Mutex::new(session),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the account email.
    #[must_use]
    pub fn email(&self) -> &str {
        self.config.email()
    }

    /// Returns the client UUID presented at login.
    #[must_use]
    pub fn client_uuid(&self) -> &str {
        &self.client_uuid
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Returns the customer id reported by the last successful login.
    #[must_use]
    pub fn customer_id(&self) -> Option<String> {
        self.session.lock().customer_id.clone()
    }

    /// Returns a snapshot of the endpoint map.
    #[must_use]
    pub fn endpoints(&self) -> EndpointMap {
        self.session.lock().endpoints.clone()
    }

    /// Returns the session status flags.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.lock().status
    }

    /// Returns the session counters.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.session.lock().stats
    }

    /// Returns `true` if the last credential login succeeded and no 401 or
    /// reset has happened since.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.session.lock().status.login_successful
    }

    /// Returns the file the session cookies are persisted to.
    #[must_use]
    pub fn cookie_file(&self) -> &CookieFile {
        &self.cookie_file
    }

    /// Returns the session id cookie value, if the jar holds one.
    #[must_use]
    pub fn session_cookie(&self) -> Option<String> {
        self.session
            .lock()
            .cookies
            .get(SESSION_COOKIE)
            .map(|cookie| cookie.value.clone())
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Checks whether the current session can be reused.
    ///
    /// The session is valid if the last credential login is less than 24
    /// hours old, the cookie file exists, and the validation endpoint answers
    /// `messageCode == 200` for the stored cookies. Decode and transport
    /// failures count as invalid. An invalid session is [`reset`](Self::reset).
    pub async fn valid_login(&self) -> bool {
        let (fresh, jar_empty) = {
            let session = self.session.lock();
            let fresh = session.status.login_successful
                && session
                    .stats
                    .login_timestamp
                    .is_some_and(|at| Utc::now() - at < TimeDelta::hours(SESSION_LIFETIME_HOURS));
            (fresh, session.cookies.is_empty())
        };

        if fresh && self.cookie_file.exists().await {
            if jar_empty {
                match self.cookie_file.load().await {
                    Ok(jar) => self.session.lock().cookies = jar,
                    Err(e) => tracing::debug!(error = %e, "Could not restore cookie jar"),
                }
            }
            if self.validate_remote().await {
                tracing::debug!("Session validated with stored cookie");
                self.record_api_call();
                return true;
            }
        } else {
            tracing::debug!("Login older than 24h or cookie file missing");
        }

        if let Err(e) = self.reset().await {
            tracing::warn!(error = %e, "Failed to reset login");
        }
        false
    }

    async fn validate_remote(&self) -> bool {
        let url = self.session.lock().endpoints.valid_session.clone();
        let response = match self.post(&url, &json!({})).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "Session validation request failed");
                return false;
            }
        };

        match response.json::<Value>().await {
            Ok(body) if json_int(&body, "messageCode") == Some(200) => true,
            Ok(body) => {
                tracing::debug!(body = %obfuscate(&body), "Session validation rejected");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "Session validation returned invalid JSON");
                false
            }
        }
    }

    /// Logs in, reusing the current session unless `skip_validation` is set.
    ///
    /// Returns `true` if the account is authenticated afterwards. A login
    /// rejected by the service returns `Ok(false)` and leaves the previous
    /// session state untouched.
    ///
    /// After a successful credential login the cookie jar is persisted and
    /// the server endpoints are fetched; failing to fetch the endpoints is
    /// logged but does not fail the login.
    ///
    /// # Errors
    ///
    /// - [`Error::CloseRequested`] after [`close`](Self::close)
    /// - [`Error::Http`] if the service cannot be reached
    /// - [`Error::Login`] if the answer is not JSON or the cookie cannot be saved
    pub async fn login(&self, skip_validation: bool) -> Result<bool> {
        if self.is_closed() {
            return Err(Error::CloseRequested);
        }
        if !skip_validation && self.valid_login().await {
            return Ok(true);
        }

        tracing::debug!(email = %hide_email(self.email()), "Using credentials to log in");

        let url = self.session.lock().endpoints.login.clone();
        let body = json!({
            "user": self.config.email(),
            "pwd": self.config.password(),
            "uuid": self.client_uuid,
            "osType": "android",
            "productCode": "life",
            "appCode": "life",
        });
        let response = self.post(&url, &body).await?;
        let reply: Value = response
            .json()
            .await
            .map_err(|e| Error::login(format!("invalid login response: {e}")))?;

        if json_int(&reply, "ret") != Some(0) {
            tracing::debug!(
                email = %hide_email(self.email()),
                reply = %obfuscate(&reply),
                "Login not possible"
            );
            return Ok(false);
        }

        {
            let mut session = self.session.lock();
            session.customer_id = json_string(&reply, "customerId");
            session.status.login_successful = true;
            session.stats.login_timestamp = Some(Utc::now());
            session.stats.api_calls += 1;
        }
        tracing::info!(email = %hide_email(self.email()), "Login successful");

        self.save_cookie_file().await?;
        self.fetch_server_info().await;
        Ok(true)
    }

    /// Persists the current cookie jar, replacing any stale file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] if the jar cannot be written.
    pub async fn save_cookie_file(&self) -> Result<()> {
        let jar = self.session.lock().cookies.clone();
        self.cookie_file.save(&jar).await?;
        tracing::debug!(
            cookies = ?jar.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Saved session cookies"
        );
        Ok(())
    }

    /// Fetches broker and application server addresses and merges them into
    /// the endpoint map. Failures leave the map unchanged.
    async fn fetch_server_info(&self) {
        let url = self.session.lock().endpoints.server_details.clone();
        tracing::debug!(url = %url, "Getting server endpoints");

        let response = match self.post(&url, &json!({})).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Server details request failed");
                return;
            }
        };
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "Server details returned invalid JSON");
                return;
            }
        };
        if json_int(&body, "messageCode") != Some(200) {
            tracing::debug!(body = %obfuscate(&body), "Server details rejected");
            return;
        }

        let mqtt_port = json_int(&body, "mqttSslPort").and_then(|port| u16::try_from(port).ok());
        let mut session = self.session.lock();
        session.endpoints.merge_server_info(
            json_string(&body, "appServerAddr"),
            json_string(&body, "inceptionAddr"),
            mqtt_port,
        );
        tracing::debug!(endpoints = ?session.endpoints, "Resolved server endpoints");
    }

    /// Discards the current session.
    ///
    /// Replaces the HTTP connector, clears status flags, the customer id and
    /// cookies, and deletes the cookie file. Calling it repeatedly has no further effect.
    /// The endpoint map and counters are kept.
    ///
    /// # Errors
    ///
    /// Returns error if a new HTTPS connector cannot be created.
    pub async fn reset(&self) -> Result<()> {
        tracing::debug!(email = %hide_email(self.email()), "Resetting login");
        let client = build_client(self.config.timeout())?;
        {
            let mut session = self.session.lock();
            session.client = client;
            session.status = SessionStatus::default();
            session.customer_id = None;
            session.cookies.clear();
        }
        if self.cookie_file.exists().await {
            self.cookie_file.delete().await;
        }
        Ok(())
    }

    /// Requests shutdown of this login.
    ///
    /// Every later guarded operation fails with [`Error::CloseRequested`].
    pub fn close(&self) {
        tracing::debug!(email = %hide_email(self.email()), "Closing login");
        self.closed.store(true, Ordering::Release);
    }

    /// Ensures a valid session before a guarded operation.
    ///
    /// Performs one validity check and, if it fails, one credential login.
    /// A valid session whose server endpoints are still unknown fetches them
    /// again. Returns whether a session is available.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`login`](Self::login).
    pub async fn ensure_session(&self) -> Result<bool> {
        if self.is_closed() {
            return Err(Error::CloseRequested);
        }
        if self.valid_login().await {
            let resolved = self.session.lock().endpoints.is_resolved();
            if !resolved {
                self.fetch_server_info().await;
            }
            return Ok(true);
        }
        self.login(true).await
    }

    pub(crate) fn record_api_call(&self) {
        self.session.lock().stats.api_calls += 1;
    }

    pub(crate) fn mark_login_failed(&self) {
        self.session.lock().status.login_successful = false;
    }

    pub(crate) async fn post(&self, url: &str, body: &Value) -> Result<Response> {
        let url = Url::parse(url)
            .map_err(|e| Error::InvalidConfig(format!("invalid URL {url}: {e}")))?;
        self.send(Method::POST, url, Some(body)).await
    }

    /// Sends a request with the session cookies and captures the cookies of
    /// the answer.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response> {
        if self.is_closed() {
            return Err(Error::CloseRequested);
        }
        let (client, cookie_header) = {
            let session = self.session.lock();
            (session.client.clone(), session.cookies.header_for(&url))
        };

        let mut request = client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(cookie_header) = cookie_header {
            request = request.header(COOKIE, cookie_header);
        }

        let response = request.send().await?;
        self.session.lock().cookies.store_response(&response);
        Ok(response)
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("email", &hide_email(self.email()))
            .field("logged_in", &self.is_logged_in())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoginConfig {
        let root =
            std::env::temp_dir().join(format!("sengled-login-{}", uuid::Uuid::new_v4().simple()));
        LoginConfig::new("user@example.com", "pw")
            .with_output_root(root)
            .with_endpoints(EndpointMap::with_base("http://127.0.0.1:9"))
    }

    #[test]
    fn generated_uuid_is_upper_hex() {
        let login = Login::new(config()).unwrap();
        assert_eq!(login.client_uuid().len(), 32);
        assert!(
            login
                .client_uuid()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
    }

    #[test]
    fn configured_uuid_is_kept() {
        let login = Login::new(config().with_client_uuid("FIXED")).unwrap();
        assert_eq!(login.client_uuid(), "FIXED");
    }

    #[test]
    fn new_login_is_unauthenticated() {
        let login = Login::new(config()).unwrap();
        assert!(!login.is_logged_in());
        assert!(login.customer_id().is_none());
        assert!(login.session_cookie().is_none());
        assert!(login.stats().login_timestamp.is_none());
        assert!(!login.endpoints().is_resolved());
    }

    #[tokio::test]
    async fn fresh_login_is_not_valid_without_network() {
        let login = Login::new(config()).unwrap();
        assert!(!login.valid_login().await);
        assert_eq!(login.stats().api_calls, 0);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let login = Login::new(config()).unwrap();
        login.reset().await.unwrap();
        let status = login.status();
        login.reset().await.unwrap();
        assert_eq!(login.status(), status);
        assert!(!login.cookie_file().exists().await);
    }

    #[tokio::test]
    async fn closed_login_rejects_calls() {
        let login = Login::new(config()).unwrap();
        login.close();
        assert!(matches!(login.login(true).await, Err(Error::CloseRequested)));
        assert!(matches!(
            login.ensure_session().await,
            Err(Error::CloseRequested)
        ));
    }
}
