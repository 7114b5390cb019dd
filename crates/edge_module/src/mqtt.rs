mod mqtt_client;
pub(crate) mod subscriber;
mod topic;

pub use mqtt_client::{create_mqtt_client, parse_broker_url, MqttTransportConfig, MqttTwinClient};
#[cfg(any(test, feature = "testing"))]
pub use subscriber::MockMqttResponder;
pub use subscriber::{run_mqtt_module, MqttResponder};
pub use topic::{
    desired_properties_topic, method_response_topic, output_topic, parse_topic,
    reported_properties_topic, subscription_filters, InboundTopic,
};
