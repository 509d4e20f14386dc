// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT connection using mockforge-mqtt and wiremock.

#![cfg(feature = "mqtt")]

use std::sync::Arc;
use std::time::Duration;

use mockforge_mqtt::broker::MqttConfig as BrokerConfig;
use mockforge_mqtt::start_mqtt_server;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use sengled_lib::api::set_device_state;
use sengled_lib::event::{ConnectionState, MqttEvent};
use sengled_lib::protocol::{MqttConfig, MqttManager};
use sengled_lib::{DeviceRecord, DeviceStateChange, EndpointMap, Error, Login, LoginConfig};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = BrokerConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to bind
    sleep(Duration::from_millis(500)).await;
}

/// Starts a cloud mock whose server details point at the broker on `port`.
async fn start_cloud(port: u16) -> MockServer {
    start_cloud_with_broker(&format!("mqtt://127.0.0.1:{port}"), port).await
}

/// Starts a cloud mock reporting `broker` as the MQTT endpoint.
async fn start_cloud_with_broker(broker: &str, port: u16) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/user/app/customer/v3/AuthenCross.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "JSESSIONID=abc123; Path=/")
                .set_body_json(json!({"ret": 0, "customerId": "42"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/user/app/customer/v2/isSessionTimeout.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageCode": 200})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/life2/server/getServerInfo.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messageCode": 200,
            "appServerAddr": format!("{}/life2", server.uri()),
            "inceptionAddr": broker,
            "mqttSslPort": port
        })))
        .mount(&server)
        .await;

    server
}

fn manager(server: &MockServer) -> (MqttManager, mpsc::Receiver<MqttEvent>) {
    manager_with(
        server,
        MqttConfig::default().with_connection_timeout(Duration::from_secs(5)),
    )
}

fn manager_with(
    server: &MockServer,
    mqtt_config: MqttConfig,
) -> (MqttManager, mpsc::Receiver<MqttEvent>) {
    let root =
        std::env::temp_dir().join(format!("sengled-test-{}", uuid::Uuid::new_v4().simple()));
    let config = LoginConfig::new("user@example.com", "secret")
        .with_output_root(root)
        .with_endpoints(EndpointMap::with_base(&server.uri()));
    let login = Arc::new(Login::new(config).unwrap());
    MqttManager::new(login, mqtt_config).unwrap()
}

/// Connects a second client to the broker, standing in for a device.
fn device_client(port: u16) -> AsyncClient {
    let mut options = MqttOptions::new(format!("device-{port}"), "127.0.0.1", port);
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut event_loop) = AsyncClient::new(options, 16);
    tokio::spawn(async move { while event_loop.poll().await.is_ok() {} });
    client
}

fn status_payload(time: i64) -> Vec<u8> {
    json!([
        {"type": "switch", "value": "1", "time": time},
        {"type": "brightness", "value": "50", "time": time}
    ])
    .to_string()
    .into_bytes()
}

async fn next_event(events: &mut mpsc::Receiver<MqttEvent>) -> Option<MqttEvent> {
    timeout(Duration::from_secs(5), events.recv()).await.ok().flatten()
}

// ============================================================================
// Connection
// ============================================================================

mod connection {
    use super::*;

    #[tokio::test]
    async fn connect_reports_connected() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let server = start_cloud(port).await;

        let (mqtt, mut events) = manager(&server);
        mqtt.connect(vec![DeviceRecord::new("D1"), DeviceRecord::new("D2")])
            .await
            .unwrap();

        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Connected));
        assert_eq!(mqtt.devices().len(), 2);
        assert_eq!(mqtt.login().session_cookie().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn disconnect_reports_disconnected() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let server = start_cloud(port).await;

        let (mqtt, mut events) = manager(&server);
        mqtt.connect(Vec::new()).await.unwrap();
        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Connected));

        mqtt.disconnect().await.unwrap();
        assert_eq!(mqtt.state(), ConnectionState::Disconnected);
        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Disconnected));
    }

    #[tokio::test]
    async fn unreachable_broker_reports_disconnected() {
        // Nothing listens on this port.
        let port = get_test_port();
        let server = start_cloud(port).await;

        let (mqtt, mut events) = manager(&server);
        mqtt.connect(Vec::new()).await.unwrap();

        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Disconnected));
        assert!(!mqtt.is_connected());
    }

    #[tokio::test]
    async fn wss_endpoint_connects_over_tls() {
        // Nothing listens here, the TLS transport is still built and polled.
        let port = get_test_port();
        let server = start_cloud_with_broker(&format!("wss://127.0.0.1:{port}/mqtt"), port).await;

        let (mqtt, mut events) = manager(&server);
        mqtt.connect(vec![DeviceRecord::new("D1")]).await.unwrap();

        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Disconnected));
        assert_eq!(mqtt.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_without_session_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/app/customer/v3/AuthenCross.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ret": 1})))
            .mount(&server)
            .await;

        let (mqtt, _events) = manager(&server);
        let result = mqtt.connect(Vec::new()).await;
        assert!(matches!(result, Err(Error::Login(_))));
        assert_eq!(mqtt.state(), ConnectionState::Disconnected);
    }
}

// ============================================================================
// Publishing
// ============================================================================

mod publishing {
    use super::*;

    #[tokio::test]
    async fn publish_after_connect() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let server = start_cloud(port).await;

        let (mqtt, mut events) = manager(&server);
        mqtt.connect(Vec::new()).await.unwrap();
        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Connected));

        let sent = mqtt
            .publish("wifielement/D1/update", b"[]".to_vec())
            .await
            .unwrap();
        assert!(sent);
    }

    #[tokio::test]
    async fn publish_reconnects_lazily() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let server = start_cloud(port).await;

        let (mqtt, _events) = manager(&server);
        assert!(!mqtt.is_connected());

        let change = DeviceStateChange::new().power_on(true).brightness(128);
        assert!(set_device_state(&mqtt, "D1", &change).await.unwrap());
        assert!(mqtt.is_connected());
    }

    #[tokio::test]
    async fn publish_fails_when_broker_unreachable() {
        let port = get_test_port();
        let server = start_cloud(port).await;

        let (mqtt, _events) = manager(&server);
        let result = mqtt.publish("wifielement/D1/update", b"[]".to_vec()).await;
        assert!(matches!(result, Err(Error::Mqtt(_))));
    }
}

// ============================================================================
// Incoming Messages
// ============================================================================

mod incoming {
    use super::*;

    #[tokio::test]
    async fn device_status_is_delivered_as_event() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let server = start_cloud(port).await;

        let (mqtt, mut events) = manager(&server);
        mqtt.connect(vec![DeviceRecord::new("D1")]).await.unwrap();
        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Connected));
        // Let the status subscription reach the broker
        sleep(Duration::from_millis(300)).await;

        let device = device_client(port);
        device
            .publish("wifielement/D1/status", QoS::AtLeastOnce, false, status_payload(100))
            .await
            .unwrap();

        let Some(MqttEvent::Status(status)) = next_event(&mut events).await else {
            panic!("expected a status event");
        };
        assert_eq!(status.device_id, "D1");
        assert_eq!(status.timestamp, 100);
        assert_eq!(status.attribute("switch"), Some("1"));
        assert_eq!(status.attribute("brightness"), Some("50"));
        assert_eq!(status.attributes.len(), 2);
    }

    #[tokio::test]
    async fn subscribe_runs_callback_until_disconnect() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let server = start_cloud(port).await;

        let (mqtt, mut events) = manager(&server);
        mqtt.connect(Vec::new()).await.unwrap();
        assert_eq!(next_event(&mut events).await, Some(MqttEvent::Connected));

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let subscriber = mqtt.clone();
        let subscription = tokio::spawn(async move {
            subscriber
                .subscribe("custom/+/report", move |topic, payload| {
                    let _ = seen_tx.send((topic.to_string(), payload.to_vec()));
                })
                .await
        });
        sleep(Duration::from_millis(300)).await;
        assert!(!subscription.is_finished());

        let device = device_client(port);
        device
            .publish("custom/D7/report", QoS::AtLeastOnce, false, b"hello".to_vec())
            .await
            .unwrap();

        let seen = timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, ("custom/D7/report".to_string(), b"hello".to_vec()));

        mqtt.disconnect().await.unwrap();
        let subscribed = timeout(Duration::from_secs(5), subscription)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(subscribed);
    }

    #[tokio::test]
    async fn slow_consumer_does_not_stall_publishing() {
        let port = get_test_port();
        start_mock_broker(port).await;
        let server = start_cloud(port).await;

        let config = MqttConfig::default()
            .with_connection_timeout(Duration::from_secs(5))
            .with_event_capacity(2)
            .with_event_timeout(Duration::from_millis(100));
        let (mqtt, mut events) = manager_with(&server, config);
        mqtt.connect(vec![DeviceRecord::new("D1")]).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        assert!(mqtt.is_connected());

        // Nobody drains the channel while the device reports.
        let device = device_client(port);
        for time in 0..5 {
            device
                .publish("wifielement/D1/status", QoS::AtLeastOnce, false, status_payload(time))
                .await
                .unwrap();
        }
        sleep(Duration::from_secs(1)).await;

        let sent = mqtt
            .publish("wifielement/D1/update", b"[]".to_vec())
            .await
            .unwrap();
        assert!(sent);

        assert_eq!(events.recv().await, Some(MqttEvent::Connected));
        assert!(matches!(events.recv().await, Some(MqttEvent::Status(_))));
    }
}
