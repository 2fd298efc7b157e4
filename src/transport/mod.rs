//! MQTT transport for the job queue and the broadcast topic.

mod mqtt;
mod tls;

pub use mqtt::{
    publish_packet_size, MqttBridge, MqttLinkConfig, DEFAULT_CLIENT_ID, DEFAULT_QUEUE_TOPIC,
};
pub use tls::{parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint, TlsMaterials};
