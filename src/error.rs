// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the Sengled cloud client.
//!
//! The hierarchy follows how failures are handled rather than where they
//! come from: connection-class and rate-limit errors are retried by the
//! request pipeline, login errors force re-authentication, and
//! [`Error::CloseRequested`] always reaches the caller.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The cloud service could not be reached or answered with a server error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport-level HTTP failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Authentication failed or the session is no longer valid.
    #[error("login error: {0}")]
    Login(String),

    /// The service is rate limiting this account.
    #[error("too many requests: {0}")]
    TooManyRequests(String),

    /// The service rejected the request.
    #[error("API returned HTTP {status}: {reason}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase.
        reason: String,
    },

    /// The host asked this login to close; no further calls are accepted.
    #[error("login close requested")]
    CloseRequested,

    /// The operation was cancelled or timed out.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A response could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// MQTT connection or communication failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    /// The client was configured with unusable values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns `true` if the request pipeline should retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::TooManyRequests(_) => true,
            Self::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            _ => false,
        }
    }

    pub(crate) fn login(message: impl Into<String>) -> Self {
        Self::Login(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(ParseError::Json(err))
    }
}

/// Errors related to parsing service responses and broker messages.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the response.
    #[error("missing field in response: {0}")]
    MissingField(String),

    /// Unexpected response format.
    #[error("unexpected response format: {0}")]
    UnexpectedFormat(String),

    /// Failed to parse a specific value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },
}

/// Errors related to the MQTT connection.
#[cfg(feature = "mqtt")]
#[derive(Debug, Error)]
pub enum MqttError {
    /// The MQTT client rejected a request.
    #[error("client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// The broker refused or dropped the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker did not answer in time.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// The broker endpoint is missing or malformed.
    #[error("invalid broker address: {0}")]
    InvalidAddress(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
