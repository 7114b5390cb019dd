use config::{Config, ConfigError, Environment};
use edge_module::domain::EdgeModuleConfig;
use edge_module::mqtt::MqttTransportConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,

    // MQTT configuration
    /// Broker address, e.g. mqtt://localhost:1883
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    /// Root of every topic the module uses
    #[serde(default = "default_mqtt_topic_prefix")]
    pub mqtt_topic_prefix: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    #[serde(default = "default_mqtt_retry_delay_secs")]
    pub mqtt_retry_delay_secs: u64,

    #[serde(default = "default_mqtt_max_retry_attempts")]
    pub mqtt_max_retry_attempts: u32,

    #[serde(default = "default_mqtt_channel_capacity")]
    pub mqtt_channel_capacity: usize,

    // Module configuration
    /// Name announced in the module-loaded message
    #[serde(default = "default_module_id")]
    pub module_id: String,

    #[serde(default = "default_fruit_input_route")]
    pub fruit_input_route: String,

    #[serde(default = "default_orientation_input_route")]
    pub orientation_input_route: String,

    #[serde(default = "default_set_fruit_method")]
    pub set_fruit_method: String,

    #[serde(default = "default_set_orientation_method")]
    pub set_orientation_method: String,

    /// Output routes for the module-loaded message (comma-separated)
    #[serde(default = "default_module_loaded_routes")]
    pub module_loaded_routes: String,

    /// Time allowed for processes and closers to stop on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    // Telemetry configuration
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logs() -> bool {
    true
}

// MQTT defaults
fn default_mqtt_broker_url() -> String {
    MqttTransportConfig::default().broker_url
}

fn default_mqtt_client_id() -> String {
    MqttTransportConfig::default().client_id
}

fn default_mqtt_topic_prefix() -> String {
    MqttTransportConfig::default().topic_prefix
}

fn default_mqtt_keep_alive_secs() -> u64 {
    MqttTransportConfig::default().keep_alive_secs
}

fn default_mqtt_retry_delay_secs() -> u64 {
    MqttTransportConfig::default().retry_delay_secs
}

fn default_mqtt_max_retry_attempts() -> u32 {
    MqttTransportConfig::default().max_retry_attempts
}

fn default_mqtt_channel_capacity() -> usize {
    MqttTransportConfig::default().channel_capacity
}

// Module defaults
fn default_module_id() -> String {
    EdgeModuleConfig::default().module_id
}

fn default_fruit_input_route() -> String {
    EdgeModuleConfig::default().fruit_input_route
}

fn default_orientation_input_route() -> String {
    EdgeModuleConfig::default().orientation_input_route
}

fn default_set_fruit_method() -> String {
    EdgeModuleConfig::default().set_fruit_method
}

fn default_set_orientation_method() -> String {
    EdgeModuleConfig::default().set_orientation_method
}

fn default_module_loaded_routes() -> String {
    EdgeModuleConfig::default().module_loaded_routes.join(",")
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

// Telemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "twinbridge".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TWINBRIDGE"))
            .build()?
            .try_deserialize()
    }

    pub fn edge_module_config(&self) -> EdgeModuleConfig {
        EdgeModuleConfig {
            module_id: self.module_id.clone(),
            fruit_input_route: self.fruit_input_route.clone(),
            orientation_input_route: self.orientation_input_route.clone(),
            set_fruit_method: self.set_fruit_method.clone(),
            set_orientation_method: self.set_orientation_method.clone(),
            module_loaded_routes: self
                .module_loaded_routes
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn mqtt_transport_config(&self) -> MqttTransportConfig {
        MqttTransportConfig {
            broker_url: self.mqtt_broker_url.clone(),
            client_id: self.mqtt_client_id.clone(),
            topic_prefix: self.mqtt_topic_prefix.clone(),
            keep_alive_secs: self.mqtt_keep_alive_secs,
            retry_delay_secs: self.mqtt_retry_delay_secs,
            max_retry_attempts: self.mqtt_max_retry_attempts,
            channel_capacity: self.mqtt_channel_capacity,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
