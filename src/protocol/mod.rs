// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport layer for the Sengled cloud.
//!
//! # Request pipeline
//!
//! Every REST call goes through explicit wrappers applied at the call site:
//!
//! - [`guarded`]: deadline plus failure classification (timeouts and
//!   cancellations become "no result", close requests always propagate)
//! - [`with_retry`]: exponential backoff for rate-limit and connection errors
//! - [`ApiClient`]: session check, cookies and status classification
//!
//! # MQTT
//!
//! - [`MqttManager`]: WebSocket connection to the broker, status
//!   subscriptions and control publishing
//! - topic helpers: [`status_topic`], [`update_topic`], [`topic_matches`]

mod guard;
mod http;
#[cfg(feature = "mqtt")]
mod mqtt;
mod retry;
#[cfg(feature = "mqtt")]
mod topic;

pub use guard::guarded;
pub use http::{ApiClient, ApiResponse, classify_status};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttManager, client_identity};
pub use retry::{RetryPolicy, with_retry};
#[cfg(feature = "mqtt")]
pub use topic::{
    CallbackRouter, MessageCallback, TOPIC_ROOT, parse_status_message, status_subscriptions,
    status_topic, topic_matches, update_topic,
};
