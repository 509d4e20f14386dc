// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session cookies and their on-disk persistence.
//!
//! The cloud service authenticates every call after login through a
//! `JSESSIONID` cookie. [`CookieJar`] captures the cookies reqwest parses
//! from responses and builds the `Cookie` header for later requests.
//! [`CookieFile`] persists the jar next to the session. A stored jar is only
//! reused while the in-memory login that wrote it is still fresh; a new
//! process starts with a credential login.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tag prefixed to every cookie file name.
pub const DOMAIN_TAG: &str = "sengledwifi";

/// Name of the cookie carrying the cloud session id.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// A cookie as kept in the jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain the cookie applies to, without a leading dot.
    pub domain: String,
    /// `true` if the cookie only applies to `domain` itself, not subdomains.
    pub host_only: bool,
    /// Path prefix the cookie applies to.
    pub path: String,
    /// Only send over HTTPS.
    pub secure: bool,
    /// Expiry, `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let domain_ok = if self.host_only {
            host.eq_ignore_ascii_case(&self.domain)
        } else {
            host.eq_ignore_ascii_case(&self.domain)
                || host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", self.domain.to_ascii_lowercase()))
        };
        domain_ok
            && path_matches(&self.path, url.path())
            && (!self.secure || url.scheme() == "https")
    }
}

/// Path match of RFC 6265 section 5.1.4: `/life` matches `/life` and
/// `/life/x`, not `/life2`.
fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => rest.is_empty() || cookie_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Default cookie path of RFC 6265 section 5.1.4: the request path up to,
/// not including, its last `/`.
fn default_path(url: &Url) -> String {
    match url.path().rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => url.path()[..index].to_string(),
    }
}

/// Collection of HTTP cookies keyed by domain, path and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cookies held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Returns `true` if the jar holds no cookies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Iterates over the stored cookies.
    pub fn iter(&self) -> impl Iterator<Item = &StoredCookie> {
        self.cookies.iter()
    }

    /// Returns the first unexpired cookie with the given name, on any domain.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StoredCookie> {
        let now = Utc::now();
        self.cookies
            .iter()
            .find(|cookie| cookie.name == name && !cookie.is_expired(now))
    }

    /// Inserts a cookie, replacing one with the same domain, path and name.
    ///
    /// A cookie that is already expired removes its stored counterpart.
    pub fn insert(&mut self, cookie: StoredCookie) {
        self.cookies.retain(|existing| {
            !(existing.name == cookie.name
                && existing.domain.eq_ignore_ascii_case(&cookie.domain)
                && existing.path == cookie.path)
        });
        if !cookie.is_expired(Utc::now()) {
            self.cookies.push(cookie);
        }
    }

    /// Captures every `Set-Cookie` header of a response.
    ///
    /// Header parsing is done by reqwest; attributes the service leaves out
    /// get their RFC 6265 defaults.
    pub fn store_response(&mut self, response: &reqwest::Response) {
        let origin = response.url().clone();
        for cookie in response.cookies() {
            let expires = cookie
                .max_age()
                .and_then(|age| TimeDelta::from_std(age).ok())
                .map(|age| Utc::now() + age)
                .or_else(|| cookie.expires().map(DateTime::<Utc>::from));
            let (domain, host_only) = match cookie.domain() {
                Some(domain) => (domain.trim_start_matches('.').to_string(), false),
                None => (origin.host_str().unwrap_or_default().to_string(), true),
            };
            self.insert(StoredCookie {
                name: cookie.name().to_string(),
                value: cookie.value().to_string(),
                domain,
                host_only,
                path: cookie
                    .path()
                    .filter(|path| path.starts_with('/'))
                    .map_or_else(|| default_path(&origin), str::to_string),
                secure: cookie.secure(),
                expires,
            });
        }
    }

    /// Builds the `Cookie` header value for a request to `url`.
    ///
    /// Returns `None` when no stored cookie applies.
    #[must_use]
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let now = Utc::now();
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|cookie| !cookie.is_expired(now) && cookie.matches(url))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Removes every cookie.
    pub fn clear(&mut self) {
        self.cookies.clear();
    }
}

/// File-backed storage for one account's cookie jar.
///
/// There is at most one file per account, at
/// `{output_root}/.storage/sengledwifi.{email}.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieFile {
    path: PathBuf,
}

impl CookieFile {
    /// Derives the cookie file location for `email` below `output_root`.
    #[must_use]
    pub fn for_account(output_root: &Path, email: &str) -> Self {
        Self {
            path: output_root
                .join(".storage")
                .join(format!("{DOMAIN_TAG}.{email}.json")),
        }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the file exists.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Reads and decodes the stored jar.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] if the file cannot be read or decoded.
    pub async fn load(&self) -> Result<CookieJar> {
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::login(format!("cannot read cookie file: {e}")))?;
        serde_json::from_slice(&content)
            .map_err(|e| Error::login(format!("cannot decode cookie file: {e}")))
    }

    /// Replaces the stored jar with `jar`.
    ///
    /// Any existing file is deleted before the new content is written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] if the jar cannot be serialized or written;
    /// an unsaved cookie would silently break later session validation.
    pub async fn save(&self, jar: &CookieJar) -> Result<()> {
        let content = serde_json::to_vec(jar)
            .map_err(|e| Error::login(format!("cannot encode cookie jar: {e}")))?;

        if self.exists().await {
            self.delete().await;
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::login(format!("cannot create cookie directory: {e}")))?;
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| Error::login(format!("cannot write cookie file: {e}")))?;
        Ok(())
    }

    /// Deletes the file. Succeeds if it is already absent.
    ///
    /// Other I/O failures are logged and otherwise ignored.
    pub async fn delete(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!("Deleted cookie file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to delete cookie file, please remove it manually");
            }
        }
    }
}
