// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT connection to the Sengled broker.
//!
//! The broker is reached over WebSocket with TLS. The client identity is
//! derived from the session cookie, so a [`MqttManager`] needs an
//! authenticated [`Login`] with resolved server endpoints.
//!
//! Connection progress and device status reports are delivered as
//! [`MqttEvent`]s on a bounded channel. When the channel is full the broker
//! task waits up to the configured event timeout, then drops the event with
//! a warning so keep-alives and publishes keep flowing.
//!
//! TLS uses the process-wide rustls crypto provider. If the host has not
//! installed one, the ring provider is installed on the first `wss://`
//! connection.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use sengled_lib::{DeviceDirectory, Login, LoginConfig};
//! use sengled_lib::event::MqttEvent;
//! use sengled_lib::protocol::{MqttConfig, MqttManager};
//!
//! # async fn example() -> sengled_lib::Result<()> {
//! let login = Arc::new(Login::new(LoginConfig::new("user@example.com", "pw"))?);
//! let directory = DeviceDirectory::new(Arc::clone(&login));
//! let devices = directory.get_devices(None).await?;
//!
//! let (mqtt, mut events) = MqttManager::new(login, MqttConfig::default())?;
//! mqtt.connect(devices).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let MqttEvent::Status(status) = event {
//!         println!("{}: {:?}", status.device_id, status.attributes);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeFilter, Transport,
};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::api::DeviceRecord;
use crate::error::{Error, MqttError, Result};
use crate::event::{ConnectionState, MqttEvent};
use crate::protocol::topic::{CallbackRouter, parse_status_message, status_subscriptions};
use crate::redact::hide_serial;
use crate::session::{Login, SESSION_COOKIE};

/// Suffix of the client identity.
const CLIENT_ID_SUFFIX: &str = "@lifeApp";
/// Client-type marker sent in the WebSocket handshake.
const CLIENT_TYPE: &str = "com.sengled.life2";
/// Default port of plain TCP brokers.
const DEFAULT_TCP_PORT: u16 = 1883;

/// Configuration of the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    keep_alive: Duration,
    connection_timeout: Duration,
    publish_timeout: Duration,
    event_timeout: Duration,
    event_capacity: usize,
    request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            event_timeout: Duration::from_secs(1),
            event_capacity: 64,
            request_capacity: 64,
        }
    }
}

impl MqttConfig {
    /// Sets the keep-alive interval (default: 60 seconds).
    #[must_use]
    pub fn with_keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Sets how long a blocking reconnect waits for the broker (default: 10 seconds).
    #[must_use]
    pub fn with_connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;
        self
    }

    /// Sets how long a publish waits to be written out (default: 5 seconds).
    #[must_use]
    pub fn with_publish_timeout(mut self, duration: Duration) -> Self {
        self.publish_timeout = duration;
        self
    }

    /// Sets how long the broker task waits for room in a full event channel
    /// before dropping the event (default: 1 second).
    #[must_use]
    pub fn with_event_timeout(mut self, duration: Duration) -> Self {
        self.event_timeout = duration;
        self
    }

    /// Sets the capacity of the event channel (default: 64).
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the capacity of the client request queue (default: 64).
    #[must_use]
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the reconnect timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns the publish timeout.
    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// Returns the event timeout.
    #[must_use]
    pub fn event_timeout(&self) -> Duration {
        self.event_timeout
    }

    /// Returns the event channel capacity.
    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 || self.request_capacity == 0 {
            return Err(Error::InvalidConfig(
                "MQTT channel capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Connection manager for the Sengled MQTT broker.
///
/// `MqttManager` is cheaply cloneable; clones share one connection.
#[derive(Clone)]
pub struct MqttManager {
    inner: Arc<MqttManagerInner>,
}

struct MqttManagerInner {
    login: Arc<Login>,
    config: MqttConfig,
    state: watch::Sender<ConnectionState>,
    /// Devices whose status topics are subscribed on connect.
    devices: RwLock<Vec<DeviceRecord>>,
    router: CallbackRouter,
    events: mpsc::Sender<MqttEvent>,
    /// Signalled when the event loop writes a publish to the network.
    published: Notify,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttManager {
    /// Creates a manager and the receiver of its events.
    ///
    /// No connection is opened until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a channel capacity is zero.
    pub fn new(login: Arc<Login>, config: MqttConfig) -> Result<(Self, mpsc::Receiver<MqttEvent>)> {
        config.validate()?;
        let (events, events_rx) = mpsc::channel(config.event_capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let inner = MqttManagerInner {
            login,
            config,
            state,
            devices: RwLock::new(Vec::new()),
            router: CallbackRouter::new(),
            events,
            published: Notify::new(),
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
        };
        Ok((
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        ))
    }

    /// Returns the login this connection authenticates with.
    #[must_use]
    pub fn login(&self) -> &Arc<Login> {
        &self.inner.login
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MqttConfig {
        &self.inner.config
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns whether the broker accepted the current connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the devices subscribed on connect.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.inner.devices.read().clone()
    }

    /// Opens the connection in the background.
    ///
    /// Returns once the connection attempt has started. Acceptance is
    /// reported as [`MqttEvent::Connected`], after the status topic of every
    /// device in `devices` has been subscribed. A refusal is reported as
    /// [`MqttEvent::ConnectionRefused`] and is not retried.
    ///
    /// # Errors
    ///
    /// - [`Error::Login`] if no session can be established
    /// - [`Error::Mqtt`] if the broker endpoint is missing or malformed
    /// - [`Error::CloseRequested`] after the login was closed
    pub async fn connect(&self, devices: Vec<DeviceRecord>) -> Result<()> {
        *self.inner.devices.write() = devices;
        self.start(None).await
    }

    /// Publishes `payload` at QoS 0.
    ///
    /// Reconnects first if needed, waiting up to the connection timeout.
    /// Returns whether the message was written out within the publish
    /// timeout. Delivery to subscribers is not confirmed.
    ///
    /// # Errors
    ///
    /// Returns error if the reconnect fails or the client rejects the publish.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<bool> {
        self.ensure_connected().await?;
        let client = self.client()?;

        let published = self.inner.published.notified();
        tokio::pin!(published);
        published.as_mut().enable();

        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(MqttError::from)?;

        let sent = tokio::time::timeout(self.inner.config.publish_timeout, published)
            .await
            .is_ok();
        tracing::debug!(topic = %topic, sent, "MQTT publish");
        Ok(sent)
    }

    /// Subscribes to `topic` and invokes `callback` for every matching message.
    ///
    /// Reconnects first if needed. On success this call does not return
    /// until the connection ends, so callers usually spawn it.
    /// Returns `false` if the subscription request was rejected.
    ///
    /// # Errors
    ///
    /// Returns error if the reconnect fails.
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> Result<bool>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        self.ensure_connected().await?;
        let client = self.client()?;

        if let Err(e) = client.subscribe(topic, QoS::AtMostOnce).await {
            tracing::warn!(topic = %topic, error = %e, "MQTT subscribe failed");
            return Ok(false);
        }
        self.inner.router.register(topic, Arc::new(callback));
        tracing::debug!(topic = %topic, "Subscribed, waiting for the connection to end");

        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|state| *state != ConnectionState::Connected)
            .await;
        Ok(true)
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be queued.
    pub async fn disconnect(&self) -> Result<()> {
        let client = self.inner.client.lock().take();
        if let Some(client) = client
            && self.inner.is_loop_running()
        {
            tracing::info!("Disconnecting from MQTT broker");
            client.disconnect().await.map_err(MqttError::from)?;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn client(&self) -> Result<AsyncClient> {
        self.inner
            .client
            .lock()
            .clone()
            .ok_or_else(|| MqttError::ConnectionFailed("not connected".to_string()).into())
    }

    /// Reconnects and waits for the broker's answer unless already connected.
    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        tracing::debug!("MQTT not connected, reconnecting");

        let (connack_tx, connack_rx) = oneshot::channel();
        self.start(Some(connack_tx)).await?;

        let timeout = self.inner.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(MqttError::ConnectionFailed(
                "connection refused by broker".to_string(),
            )
            .into()),
            Ok(Err(_)) => Err(MqttError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )
            .into()),
            Err(_) => Err(MqttError::Timeout(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )
            .into()),
        }
    }

    /// Starts a new connection and its event loop, replacing any previous one.
    async fn start(&self, connack_tx: Option<oneshot::Sender<bool>>) -> Result<()> {
        if !self.inner.login.ensure_session().await? {
            return Err(Error::login("no session available for MQTT"));
        }
        let options = self.options()?;
        let (client, event_loop) = AsyncClient::new(options, self.inner.config.request_capacity);

        if let Some(previous) = self.inner.event_loop.lock().take() {
            previous.abort();
        }
        *self.inner.client.lock() = Some(client.clone());
        self.inner.set_state(ConnectionState::Connecting);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            handle_events(event_loop, client, inner, connack_tx).await;
        });
        *self.inner.event_loop.lock() = Some(handle);
        Ok(())
    }

    /// Derives the connection options from the current session.
    fn options(&self) -> Result<MqttOptions> {
        let session_id = self
            .inner
            .login
            .session_cookie()
            .ok_or_else(|| Error::login("session cookie missing"))?;
        let endpoints = self.inner.login.endpoints();
        let url = endpoints.mqtt.ok_or_else(|| {
            MqttError::InvalidAddress("MQTT endpoint not resolved".to_string())
        })?;

        let mut options = broker_options(
            &client_identity(&session_id),
            &url,
            &session_id,
            endpoints.mqtt_port,
        )?;
        options.set_keep_alive(self.inner.config.keep_alive);
        options.set_clean_session(true);

        tracing::debug!(
            url = %url,
            client_id = %hide_serial(&session_id),
            "Initializing MQTT connection"
        );
        Ok(options)
    }
}

impl std::fmt::Debug for MqttManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttManager")
            .field("state", &self.state())
            .field("devices", &self.inner.devices.read().len())
            .field("callbacks", &self.inner.router)
            .finish_non_exhaustive()
    }
}

impl MqttManagerInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, current = ?state, "MQTT connection state changed");
        }
    }

    fn is_loop_running(&self) -> bool {
        self.event_loop
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Queues an event for the consumer.
    ///
    /// Runs on the task polling the connection, so the wait for a slow
    /// consumer is bounded by the event timeout.
    async fn emit(&self, event: MqttEvent) {
        match self.events.send_timeout(event, self.config.event_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                tracing::warn!(?event, "MQTT event channel full, dropping event");
            }
            Err(SendTimeoutError::Closed(_)) => tracing::trace!("MQTT event receiver dropped"),
        }
    }

    /// Subscribes the status topic of every known device.
    ///
    /// Runs inside the event loop, which cannot await its own request queue.
    fn subscribe_devices(&self, client: &AsyncClient) {
        let subscriptions = status_subscriptions(&self.devices.read());
        if subscriptions.is_empty() {
            return;
        }
        let count = subscriptions.len();
        let filters = subscriptions
            .into_iter()
            .map(|(path, qos)| SubscribeFilter::new(path, qos));
        match client.try_subscribe_many(filters) {
            Ok(()) => tracing::debug!(count, "Subscribed to device status topics"),
            Err(e) => tracing::warn!(error = %e, "Failed to subscribe to device status topics"),
        }
    }

    async fn handle_publish(&self, topic: &str, payload: &[u8]) {
        tracing::debug!(topic = %topic, bytes = payload.len(), "MQTT message received");
        self.router.route(topic, payload);

        match parse_status_message(topic, payload) {
            Ok(Some(status)) => self.emit(MqttEvent::Status(status)).await,
            Ok(None) => tracing::debug!(topic = %topic, "Ignoring message on unexpected topic"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Invalid status message"),
        }
    }

    async fn connection_refused(
        &self,
        reason: String,
        connack_tx: &mut Option<oneshot::Sender<bool>>,
    ) {
        tracing::warn!(reason = %reason, "MQTT connection refused");
        self.set_state(ConnectionState::Error);
        if let Some(tx) = connack_tx.take() {
            let _ = tx.send(false);
        }
        self.emit(MqttEvent::ConnectionRefused { reason }).await;
    }

    async fn connection_closed(&self) {
        self.set_state(ConnectionState::Disconnected);
        self.emit(MqttEvent::Disconnected).await;
    }
}

/// Handles MQTT events until the connection ends.
async fn handle_events(
    mut event_loop: EventLoop,
    client: AsyncClient,
    inner: Arc<MqttManagerInner>,
    mut connack_tx: Option<oneshot::Sender<bool>>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                if connack.code != ConnectReturnCode::Success {
                    inner
                        .connection_refused(format!("{:?}", connack.code), &mut connack_tx)
                        .await;
                    break;
                }
                tracing::info!("Connected to MQTT broker");
                inner.subscribe_devices(&client);
                inner.set_state(ConnectionState::Connected);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(true);
                }
                inner.emit(MqttEvent::Connected).await;
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(pkid = suback.pkid, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                inner.handle_publish(&publish.topic, &publish.payload).await;
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                inner.published.notify_waiters();
            }
            Ok(Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                inner.connection_closed().await;
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                inner
                    .connection_refused(format!("{code:?}"), &mut connack_tx)
                    .await;
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "MQTT event loop error");
                inner.connection_closed().await;
                break;
            }
        }
    }
}

/// Client identity for a session id.
#[must_use]
pub fn client_identity(session_id: &str) -> String {
    format!("{session_id}{CLIENT_ID_SUFFIX}")
}

/// Builds connection options for a broker URL.
///
/// `wss://` and `ws://` connect over WebSocket and carry the session cookie
/// in the handshake; `mqtt://`, `tcp://` and bare `host:port` connect over
/// plain TCP.
fn broker_options(
    client_id: &str,
    url: &str,
    session_id: &str,
    fallback_port: Option<u16>,
) -> std::result::Result<MqttOptions, MqttError> {
    let (scheme, rest) = url.split_once("://").unwrap_or(("mqtt", url));

    match scheme {
        "wss" | "ws" => {
            let tls = scheme == "wss";
            let default_port = fallback_port.unwrap_or(if tls { 443 } else { 80 });
            let (_, port) = parse_host_port(rest, default_port)?;

            let mut options = MqttOptions::new(client_id, url, port);
            options.set_transport(if tls {
                install_crypto_provider();
                Transport::wss_with_default_config()
            } else {
                Transport::Ws
            });

            let cookie = format!("{SESSION_COOKIE}={session_id}");
            options.set_request_modifier(move |mut request| {
                let cookie = cookie.clone();
                async move {
                    let headers = request.headers_mut();
                    if let Ok(value) = cookie.parse() {
                        headers.insert("Cookie", value);
                    }
                    if let Ok(value) = CLIENT_TYPE.parse() {
                        headers.insert("X-Requested-With", value);
                    }
                    request
                }
            });
            Ok(options)
        }
        "mqtt" | "tcp" => {
            let (host, port) = parse_host_port(rest, DEFAULT_TCP_PORT)?;
            Ok(MqttOptions::new(client_id, host, port))
        }
        other => Err(MqttError::InvalidAddress(format!(
            "unsupported scheme {other} in {url}"
        ))),
    }
}

/// Installs the ring provider unless the process already has a default.
///
/// reqwest and rumqttc enable different rustls backends, so rustls cannot
/// pick one on its own.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_ok()
        {
            tracing::debug!("Installed ring as the rustls crypto provider");
        }
    });
}

/// Splits `host[:port][/path]` into host and port.
fn parse_host_port(
    authority: &str,
    default_port: u16,
) -> std::result::Result<(String, u16), MqttError> {
    let authority = authority.split('/').next().unwrap_or_default();

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| MqttError::InvalidAddress(format!("invalid port: {port}")))?;
            (host, port)
        }
        None => (authority, default_port),
    };

    if host.is_empty() {
        return Err(MqttError::InvalidAddress(format!(
            "missing host in {authority}"
        )));
    }
    Ok((host.to_string(), port))
}
