use crate::mqtt::subscriber::MqttResponder;
use crate::mqtt::topic::{
    method_response_topic, output_topic, reported_properties_topic, subscription_filters,
};
use async_trait::async_trait;
use common::domain::{
    DomainError, DomainResult, DownstreamSender, InvocationResponse, TwinClient,
};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttTransportConfig {
    /// Broker address: `mqtt://host:port`, `tcp://host:port`, `host:port` or `host`
    pub broker_url: String,

    pub client_id: String,

    /// Root of every topic the module publishes or subscribes to
    pub topic_prefix: String,

    pub keep_alive_secs: u64,

    /// Delay before polling again after a connection error (default: 5 seconds)
    pub retry_delay_secs: u64,

    /// Consecutive connection errors tolerated before giving up (default: 10)
    pub max_retry_attempts: u32,

    /// Capacity of the outgoing request queue
    pub channel_capacity: usize,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "twinbridge-module".to_string(),
            topic_prefix: "twinbridge".to_string(),
            keep_alive_secs: 30,
            retry_delay_secs: 5,
            max_retry_attempts: 10,
            channel_capacity: 100,
        }
    }
}

impl MqttTransportConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
pub fn parse_broker_url(url: &str) -> DomainResult<(&str, u16)> {
    let url = url.trim_start_matches("mqtt://");
    let url = url.trim_start_matches("tcp://");

    let parts: Vec<&str> = url.split(':').collect();
    let (host, port) = match parts.as_slice() {
        [host] => (*host, 1883), // Default MQTT port
        [host, port] => {
            let port = port.parse::<u16>().map_err(|_| {
                DomainError::InvalidConfig(format!("Invalid port in broker URL: {}", port))
            })?;
            (*host, port)
        }
        _ => {
            return Err(DomainError::InvalidConfig(format!(
                "Invalid broker URL format: {}",
                url
            )))
        }
    };

    if host.is_empty() {
        return Err(DomainError::InvalidConfig(format!(
            "Missing host in broker URL: {}",
            url
        )));
    }

    Ok((host, port))
}

/// Create the MQTT client and the event loop that drives it
///
/// Nothing is sent until the event loop is polled by `run_mqtt_module`.
pub fn create_mqtt_client(
    config: &MqttTransportConfig,
) -> DomainResult<(Arc<MqttTwinClient>, EventLoop)> {
    let (host, port) = parse_broker_url(&config.broker_url)?;

    if config.client_id.trim().is_empty() || config.client_id.starts_with(' ') {
        return Err(DomainError::InvalidConfig(
            "MQTT client id cannot be empty or start with a space".to_string(),
        ));
    }

    let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity);

    info!(
        broker_host = %host,
        broker_port = port,
        client_id = %config.client_id,
        topic_prefix = %config.topic_prefix,
        "created MQTT client"
    );

    Ok((
        Arc::new(MqttTwinClient::new(client, config.topic_prefix.clone())),
        eventloop,
    ))
}

/// Twin, output and method-response operations over an MQTT broker
///
/// The latest desired properties seen on the twin topic are cached so the
/// module can read them back on start.
pub struct MqttTwinClient {
    client: AsyncClient,
    topic_prefix: String,
    desired: RwLock<serde_json::Value>,
}

impl MqttTwinClient {
    pub fn new(client: AsyncClient, topic_prefix: String) -> Self {
        Self {
            client,
            topic_prefix,
            desired: RwLock::new(serde_json::Value::Object(serde_json::Map::new())),
        }
    }

    /// Queue subscriptions for inputs, methods and desired properties
    ///
    /// Non-blocking so it can run from inside the event loop task.
    pub fn subscribe_all(&self) -> DomainResult<()> {
        for filter in subscription_filters(&self.topic_prefix) {
            self.client
                .try_subscribe(filter.as_str(), QoS::AtLeastOnce)
                .map_err(|e| {
                    DomainError::TransportError(anyhow::anyhow!(
                        "Failed to subscribe to {}: {}",
                        filter,
                        e
                    ))
                })?;
            debug!(topic = %filter, "queued MQTT subscription");
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }
    }

    async fn publish(&self, topic: String, payload: Vec<u8>) -> DomainResult<()> {
        let size = payload.len();
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| {
                DomainError::TransportError(anyhow::anyhow!(
                    "Failed to publish to {}: {}",
                    topic,
                    e
                ))
            })?;
        debug!(topic = %topic, payload_size = size, "published MQTT message");
        Ok(())
    }
}

#[async_trait]
impl TwinClient for MqttTwinClient {
    async fn current_desired_properties(&self) -> DomainResult<serde_json::Value> {
        Ok(self
            .desired
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn push_reported_properties(
        &self,
        key: String,
        value: serde_json::Value,
    ) -> DomainResult<()> {
        let mut properties = serde_json::Map::new();
        properties.insert(key, value);
        let body = serde_json::Value::Object(properties).to_string();
        self.publish(reported_properties_topic(&self.topic_prefix), body.into_bytes())
            .await
    }
}

#[async_trait]
impl DownstreamSender for MqttTwinClient {
    async fn send_downstream(&self, route: String, payload: bytes::Bytes) -> DomainResult<()> {
        self.publish(output_topic(&self.topic_prefix, &route), payload.to_vec())
            .await
    }
}

#[async_trait]
impl MqttResponder for MqttTwinClient {
    async fn respond_to_method(
        &self,
        request_id: String,
        response: InvocationResponse,
    ) -> DomainResult<()> {
        let topic = method_response_topic(&self.topic_prefix, response.status_code, &request_id);
        self.publish(topic, response.payload).await
    }

    fn record_desired(&self, patch: &serde_json::Value) {
        let mut desired = self.desired.write().unwrap_or_else(PoisonError::into_inner);
        merge_patch(&mut desired, patch);
    }
}

/// Apply a JSON merge patch: objects merge recursively, `null` removes a key
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch_fields) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(target_fields) = target {
        for (key, value) in patch_fields {
            if value.is_null() {
                target_fields.remove(key);
            } else {
                merge_patch(
                    target_fields
                        .entry(key.clone())
                        .or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
    }
}
