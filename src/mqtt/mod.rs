//! MQTT publishing and Home Assistant discovery.
//!
//! One outbound broker connection for the process lifetime: a driver thread
//! polls the rumqttc event loop while the publisher pushes discovery and
//! state messages. Publish failures are logged and never retried; the next
//! scheduled execution produces a fresh value anyway.

use crate::config::{CommandConfig, MqttConfig};
use crate::error::{Error, Result};
use crate::scheduler::Publisher;
use log::{debug, error, info, trace, warn};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// MQTT keepalive interval.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// How long to wait for the initial ConnAck before failing startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request queue capacity between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

/// Home Assistant discovery payload for one command sensor.
#[derive(Debug, Serialize)]
struct Discovery<'a> {
    name: &'a str,
    state_topic: String,
    unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'a str>,
    device: Device<'a>,
    #[serde(skip_serializing_if = "is_false")]
    force_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire_after: Option<u32>,
}

/// Device block grouping all command sensors under one device.
#[derive(Debug, Serialize)]
struct Device<'a> {
    identifiers: Vec<&'a str>,
    name: &'static str,
    model: &'static str,
    manufacturer: &'static str,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// MQTT-backed result publisher.
pub struct MqttPublisher {
    client: Client,
    client_id: String,
}

impl MqttPublisher {
    /// Connects to the broker and waits for the initial ConnAck.
    ///
    /// # Errors
    ///
    /// Returns an error when the broker rejects or never acknowledges the
    /// connection. This is fatal at startup, since nothing can be published
    /// without a broker.
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &config.username {
            options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);

        // The driver thread reports the first connection outcome, then keeps
        // polling the event loop for the process lifetime. rumqttc handles
        // broker reconnection on later iterations.
        let (ready_tx, ready_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut ready = Some(ready_tx);
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!("MQTT broker acknowledged connection");
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    Ok(event) => trace!("MQTT event: {:?}", event),
                    Err(e) => {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Err(e.to_string()));
                            return;
                        }
                        warn!("MQTT connection error: {}", e);
                        thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });

        match ready_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(())) => {
                info!(
                    "Connected to MQTT broker at {}:{}",
                    config.broker, config.port
                );
                Ok(Self {
                    client,
                    client_id: config.client_id.clone(),
                })
            }
            Ok(Err(e)) => Err(Error::MqttConnection(e)),
            Err(_) => Err(Error::MqttConnection(format!(
                "timed out connecting to {}:{}",
                config.broker, config.port
            ))),
        }
    }

    /// Disconnects from the broker. Errors are logged, not propagated.
    pub fn disconnect(&self) {
        match self.client.disconnect() {
            Ok(()) => info!("Disconnected from MQTT broker"),
            Err(e) => warn!("Error disconnecting from MQTT broker: {}", e),
        }
    }

    fn sensor_id(&self, cmd: &CommandConfig) -> String {
        format!("{}_{}", self.client_id, sanitize_name(&cmd.name))
    }
}

impl Publisher for MqttPublisher {
    fn announce(&self, cmd: &CommandConfig) {
        let sensor_id = self.sensor_id(cmd);
        let discovery = discovery_payload(cmd, &self.client_id, &sensor_id);

        let payload = match serde_json::to_vec(&discovery) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize discovery message for {}: {}", cmd.name, e);
                return;
            }
        };

        let topic = config_topic(&sensor_id);
        // Retained, so Home Assistant picks the sensor up after restarts.
        match self.client.publish(topic, QoS::AtMostOnce, true, payload) {
            Ok(()) => info!("Sent discovery message for {}", cmd.name),
            Err(e) => error!("Failed to send discovery message for {}: {}", cmd.name, e),
        }
    }

    fn publish(&self, cmd: &CommandConfig, result: &str) {
        let topic = state_topic(&self.sensor_id(cmd));
        match self
            .client
            .publish(topic, QoS::AtMostOnce, false, result.as_bytes())
        {
            Ok(()) => info!("Published result for {}: {}", cmd.name, result),
            Err(e) => error!("Failed to publish result for {}: {}", cmd.name, e),
        }
    }
}

fn config_topic(sensor_id: &str) -> String {
    format!("homeassistant/sensor/{}/config", sensor_id)
}

fn state_topic(sensor_id: &str) -> String {
    format!("homeassistant/sensor/{}/state", sensor_id)
}

fn discovery_payload<'a>(
    cmd: &'a CommandConfig,
    client_id: &'a str,
    sensor_id: &str,
) -> Discovery<'a> {
    Discovery {
        name: &cmd.name,
        state_topic: state_topic(sensor_id),
        unique_id: sensor_id.to_string(),
        device_class: cmd.device_class.as_deref(),
        unit_of_measurement: cmd.unit.as_deref(),
        icon: cmd.icon.as_deref(),
        device: Device {
            identifiers: vec![client_id],
            name: "Command Sensors",
            model: "cmd2mqtt",
            manufacturer: "Custom",
        },
        force_update: cmd.force_update,
        state_class: cmd.state_class.as_deref(),
        entity_category: cmd.entity_category.as_deref(),
        expire_after: cmd.expire_after,
    }
}

/// Lowercases a command name and reduces it to `[a-z0-9_]` for use as a
/// sensor identifier. Deterministic and idempotent.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("CPU Temp!"), "cpu_temp");
        assert_eq!(sanitize_name("disk-usage"), "disk_usage");
        assert_eq!(sanitize_name("load_1m"), "load_1m");
        assert_eq!(sanitize_name("Memory (free)"), "memory_free");
    }

    #[test]
    fn test_sanitize_name_idempotent() {
        let once = sanitize_name("CPU Temp!");
        let twice = sanitize_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_topics() {
        assert_eq!(
            config_topic("cmd2mqtt_cpu_temp"),
            "homeassistant/sensor/cmd2mqtt_cpu_temp/config"
        );
        assert_eq!(
            state_topic("cmd2mqtt_cpu_temp"),
            "homeassistant/sensor/cmd2mqtt_cpu_temp/state"
        );
    }

    #[test]
    fn test_discovery_payload_minimal() {
        let cmd = CommandConfig {
            name: "CPU Temp".to_string(),
            command: "sensors".to_string(),
            ..CommandConfig::default()
        };

        let payload = discovery_payload(&cmd, "cmd2mqtt", "cmd2mqtt_cpu_temp");
        let json = serde_json::to_string(&payload).unwrap();

        assert!(json.contains("\"name\":\"CPU Temp\""));
        assert!(json.contains("\"unique_id\":\"cmd2mqtt_cpu_temp\""));
        assert!(json.contains("homeassistant/sensor/cmd2mqtt_cpu_temp/state"));
        // Optional fields are elided entirely, not emitted as null/false.
        assert!(!json.contains("device_class"));
        assert!(!json.contains("force_update"));
        assert!(!json.contains("expire_after"));
    }

    #[test]
    fn test_discovery_payload_full() {
        let cmd = CommandConfig {
            name: "CPU Temp".to_string(),
            command: "sensors".to_string(),
            device_class: Some("temperature".to_string()),
            unit: Some("°C".to_string()),
            icon: Some("mdi:thermometer".to_string()),
            force_update: true,
            state_class: Some("measurement".to_string()),
            entity_category: Some("diagnostic".to_string()),
            expire_after: Some(120),
            ..CommandConfig::default()
        };

        let payload = discovery_payload(&cmd, "cmd2mqtt", "cmd2mqtt_cpu_temp");
        let json = serde_json::to_string(&payload).unwrap();

        assert!(json.contains("\"device_class\":\"temperature\""));
        assert!(json.contains("\"unit_of_measurement\":\"°C\""));
        assert!(json.contains("\"icon\":\"mdi:thermometer\""));
        assert!(json.contains("\"force_update\":true"));
        assert!(json.contains("\"state_class\":\"measurement\""));
        assert!(json.contains("\"entity_category\":\"diagnostic\""));
        assert!(json.contains("\"expire_after\":120"));
        assert!(json.contains("\"identifiers\":[\"cmd2mqtt\"]"));
    }
}
