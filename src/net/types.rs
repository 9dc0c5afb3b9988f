//! Types shared between the network worker and the ingestion manager

use serde::{Deserialize, Serialize};

use crate::bus::topics;
use crate::types::Transport;

/// Immutable connection parameters, snapshotted from configuration when the
/// worker is constructed. Changing configuration afterward requires building a
/// new worker.
#[derive(Debug, Clone)]
pub struct ConnDescriptor {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
}

/// Connection state, owned exclusively by the worker thread
///
/// Other components observe transitions only through published status events,
/// never by polling the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectWait,
}

/// Connection status payload for `connection.status_changed` events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ConnStatus {
    /// Status for an established connection
    pub fn connected(desc: &ConnDescriptor) -> Self {
        Self {
            connected: true,
            protocol: Some(desc.transport.label().to_string()),
            host: Some(desc.host.clone()),
            port: Some(desc.port),
        }
    }

    /// Status for a lost or closed connection
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            protocol: None,
            host: None,
            port: None,
        }
    }
}

/// Events emitted by the network worker
///
/// These are the worker's only outputs; it never touches application state
/// directly.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A fully decoded telemetry message
    Data(serde_json::Value),
    /// Connection status changed
    Status(ConnStatus),
    /// A transport error occurred (never fatal to the process)
    Error(String),
}

/// Sensor classification, decoded from the `type` discriminator of a
/// telemetry message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Gas,
    Gps,
    Temperature,
    Humidity,
    Accelerometer,
    Gyroscope,
    /// Packet carrying a `sensors` map of sensor-name to value pairs
    Combined,
}

impl SensorKind {
    /// Classify a discriminator string; `None` for unknown sensor types
    pub fn from_discriminator(s: &str) -> Option<Self> {
        match s {
            "gas" => Some(SensorKind::Gas),
            "gps" => Some(SensorKind::Gps),
            "temperature" => Some(SensorKind::Temperature),
            "humidity" => Some(SensorKind::Humidity),
            "accelerometer" => Some(SensorKind::Accelerometer),
            "gyroscope" => Some(SensorKind::Gyroscope),
            "combined" => Some(SensorKind::Combined),
            _ => None,
        }
    }

    /// Bus topic this sensor publishes under; `None` for `Combined`, which is
    /// decomposed into its inner entries instead
    pub fn topic(&self) -> Option<&'static str> {
        match self {
            SensorKind::Gas => Some(topics::SENSOR_GAS),
            SensorKind::Gps => Some(topics::SENSOR_GPS),
            SensorKind::Temperature => Some(topics::SENSOR_TEMPERATURE),
            SensorKind::Humidity => Some(topics::SENSOR_HUMIDITY),
            SensorKind::Accelerometer => Some(topics::SENSOR_ACCELEROMETER),
            SensorKind::Gyroscope => Some(topics::SENSOR_GYROSCOPE),
            SensorKind::Combined => None,
        }
    }
}
