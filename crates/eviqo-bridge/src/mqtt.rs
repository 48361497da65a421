//! MQTT plumbing (§4.5), grounded on `krook1-eg4-bridge/src/mqtt.rs`'s
//! setup/receiver/sender task split. `rumqttc::AsyncClient` already queues
//! outbound publishes internally, so unlike the pack reference there is no
//! separate sender task here — `AsyncClient::publish` is called directly
//! from the bridge loop; the receiver task is still its own task, since
//! polling `EventLoop` is the one thing that must run continuously.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CLIENT_ID: &str = "eviqo-bridge";

/// An inbound MQTT publish the bridge needs to route (§4.5's command
/// dispatch).
#[derive(Debug, Clone)]
pub struct InboundPublish {
    pub topic: String,
    pub payload: String,
}

pub struct Mqtt {
    client: AsyncClient,
}

impl Mqtt {
    /// Connect and return the client plus a receiver that yields inbound
    /// publishes (spawns the polling task).
    pub fn connect(url: &str, bridge_status_topic: &str) -> Result<(Self, mpsc::UnboundedReceiver<InboundPublish>), MqttConnectError> {
        let mut options = parse_mqtt_url(url)?;
        options.set_keep_alive(KEEP_ALIVE);
        options.set_last_will(LastWill::new(bridge_status_topic, "offline", QoS::AtLeastOnce, true));

        let (client, event_loop) = AsyncClient::new(options, 16);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::receiver_loop(event_loop, tx));

        Ok((Self { client }, rx))
    }

    async fn receiver_loop(mut event_loop: rumqttc::EventLoop, tx: mpsc::UnboundedSender<InboundPublish>) {
        loop {
            match tokio::time::timeout(Duration::from_secs(1), event_loop.poll()).await {
                Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                    if tx.send(InboundPublish { topic: publish.topic, payload }).is_err() {
                        return;
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "mqtt event loop error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(_) => {} // poll timeout, loop again
            }
        }
    }

    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, retain: bool) {
        if let Err(err) = self
            .client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
        {
            warn!(topic, error = %err, "mqtt publish failed");
        }
    }

    pub async fn publish_json(&self, topic: &str, value: &Value, retain: bool) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.publish(topic, bytes, retain).await,
            Err(err) => warn!(topic, error = %err, "failed to serialize discovery payload"),
        }
    }

    pub async fn subscribe(&self, topic: &str) {
        if let Err(err) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
            warn!(topic, error = %err, "mqtt subscribe failed");
        } else {
            debug!(topic, "subscribed");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MqttConnectError {
    #[error("invalid mqtt url: {0}")]
    InvalidUrl(String),
}

/// Parse `mqtt[s]://[user[:pass]@]host[:port]` and apply §6's `auto_*`
/// substitution rule: the literal tokens `auto_username`, `auto_password`,
/// `auto_hostname` are replaced from the host broker add-on's environment;
/// when the user segment is `auto_username` and no substitution exists,
/// credentials are dropped entirely rather than sent as the literal string.
fn parse_mqtt_url(url: &str) -> Result<MqttOptions, MqttConnectError> {
    let parsed = url::Url::parse(url).map_err(|e| MqttConnectError::InvalidUrl(e.to_string()))?;

    let host = substitute_auto(parsed.host_str().unwrap_or("localhost"), "HOST");
    let port = parsed.port().unwrap_or(if parsed.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut options = MqttOptions::new(CLIENT_ID, host, port);

    let username = substitute_auto(parsed.username(), "USERNAME");
    let password = substitute_auto(parsed.password().unwrap_or(""), "PASSWORD");
    if !username.is_empty() {
        options.set_credentials(username, password);
    }

    if parsed.scheme() == "mqtts" {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    Ok(options)
}

fn substitute_auto(value: &str, env_suffix: &str) -> String {
    match value {
        "auto_username" => std::env::var(format!("MQTT_{env_suffix}")).unwrap_or_default(),
        "auto_password" => std::env::var(format!("MQTT_{env_suffix}")).unwrap_or_default(),
        "auto_hostname" => std::env::var(format!("MQTT_{env_suffix}")).unwrap_or_else(|_| "localhost".to_string()),
        other => other.to_string(),
    }
}
