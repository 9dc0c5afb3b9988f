//! Ingestion Manager
//!
//! Owns the network worker's thread, translates connection configuration into
//! a worker instance, and routes decoded telemetry onto event bus topics by
//! inspecting the `type` discriminator. Ingestion is a pure producer toward
//! the bus; it subscribes to nothing.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use super::types::{ConnDescriptor, SensorKind, WorkerEvent};
use super::worker::{DEFAULT_RECONNECT_WAIT, NetWorker, WorkerHandle};
use crate::bus::{EventBus, topics};
use crate::config::ConfigStore;
use crate::types::{Error, Result, Transport};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningWorker {
    handle: WorkerHandle,
    worker_thread: thread::JoinHandle<()>,
    router_thread: thread::JoinHandle<()>,
}

/// Manages the helmet link worker and publishes its output to the event bus
pub struct IngestionManager {
    bus: Arc<EventBus>,
    desc: ConnDescriptor,
    reconnect_wait: Duration,
    worker: Option<RunningWorker>,
}

impl IngestionManager {
    pub fn new(bus: Arc<EventBus>, desc: ConnDescriptor) -> Self {
        Self {
            bus,
            desc,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            worker: None,
        }
    }

    /// Build a manager from the `network.*` configuration keys
    ///
    /// The connection parameters are snapshotted here; changing them later
    /// requires constructing a new manager.
    pub fn from_config(bus: Arc<EventBus>, config: &ConfigStore) -> Result<Self> {
        let host = config.get_or("network.esp32_ip", "192.168.1.100".to_string());
        let port = config.get_or("network.port", 8080u16);
        let protocol = config.get_or("network.protocol", "tcp".to_string());
        let reconnect_secs = config.get_or("network.reconnect_interval", 5u64);

        let desc = ConnDescriptor {
            host,
            port,
            transport: protocol.parse::<Transport>()?,
        };

        let mut manager = Self::new(bus, desc);
        manager.reconnect_wait = Duration::from_secs(reconnect_secs);
        Ok(manager)
    }

    /// Override the wait between reconnect attempts
    pub fn with_reconnect_wait(mut self, wait: Duration) -> Self {
        self.reconnect_wait = wait;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the worker thread and the router bridge
    ///
    /// Fails fast if the manager is already running; one worker per manager.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::Ingestion("ingestion already running".to_string()));
        }

        info!(
            "Starting ingestion ({} {}:{})",
            self.desc.transport.label(),
            self.desc.host,
            self.desc.port
        );

        let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>();
        let (worker, handle) = NetWorker::new(self.desc.clone(), event_tx);
        let mut worker = worker.with_reconnect_wait(self.reconnect_wait);

        let worker_thread = thread::Builder::new()
            .name("net-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::Ingestion(format!("failed to spawn worker: {}", e)))?;

        // The bridge ends when the worker drops its sender.
        let bus = Arc::clone(&self.bus);
        let router_thread = thread::Builder::new()
            .name("net-router".to_string())
            .spawn(move || {
                while let Ok(event) = event_rx.recv() {
                    route_worker_event(&bus, event);
                }
                debug!("Router bridge finished");
            })
            .map_err(|e| Error::Ingestion(format!("failed to spawn router: {}", e)))?;

        self.worker = Some(RunningWorker {
            handle,
            worker_thread,
            router_thread,
        });
        Ok(())
    }

    /// Signal the worker to stop and join both threads, bounded by a timeout
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.worker.take() else {
            return Ok(());
        };

        info!("Stopping ingestion");
        running.handle.stop();

        let join = tokio::task::spawn_blocking(move || {
            let _ = running.worker_thread.join();
            let _ = running.router_thread.join();
        });

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, join).await {
            Ok(_) => {
                info!("Ingestion stopped");
                Ok(())
            }
            Err(_) => {
                warn!("Ingestion worker did not stop within timeout");
                Err(Error::Timeout)
            }
        }
    }

    /// Send a command to the helmet with an attached unix-epoch timestamp
    ///
    /// Returns false when not running, not connected, or on the datagram
    /// transport (which does not support sending).
    pub fn send_command(&self, command: &str, params: Value) -> bool {
        let Some(running) = &self.worker else {
            debug!("send_command '{}' ignored, ingestion not running", command);
            return false;
        };

        let timestamp = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let data = json!({
            "command": command,
            "params": params,
            "timestamp": timestamp,
        });
        running.handle.send(&data)
    }
}

/// Route one worker event onto the bus
fn route_worker_event(bus: &EventBus, event: WorkerEvent) {
    match event {
        WorkerEvent::Data(message) => route_message(bus, message),
        WorkerEvent::Status(status) => match serde_json::to_value(&status) {
            Ok(payload) => bus.publish(topics::CONNECTION_STATUS, payload),
            Err(e) => warn!("Failed to encode status event: {}", e),
        },
        WorkerEvent::Error(message) => {
            bus.publish(topics::CONNECTION_ERROR, Value::String(message));
        }
    }
}

/// Classify a decoded message by its `type` discriminator and publish it
///
/// `combined` packets are decomposed into one publish per recognized inner
/// sensor entry; unrecognized inner keys and unknown top-level discriminators
/// are dropped, keeping the link forward-compatible with new sensor types.
fn route_message(bus: &EventBus, message: Value) {
    let Some(discriminator) = message.get("type").and_then(|v| v.as_str()) else {
        trace!("Dropping message without type discriminator");
        return;
    };

    match SensorKind::from_discriminator(discriminator) {
        Some(SensorKind::Combined) => {
            let Some(sensors) = message.get("sensors").and_then(|v| v.as_object()) else {
                trace!("Dropping combined packet without sensors map");
                return;
            };
            for (name, value) in sensors {
                match SensorKind::from_discriminator(name).and_then(|k| k.topic()) {
                    Some(topic) => bus.publish(topic, value.clone()),
                    None => debug!("Dropping unrecognized sensor '{}' in combined packet", name),
                }
            }
        }
        Some(kind) => {
            if let Some(topic) = kind.topic() {
                bus.publish(topic, message);
            }
        }
        None => {
            trace!("Dropping message with unknown sensor type '{}'", discriminator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::net::TcpListener;

    fn recording_bus() -> (Arc<EventBus>, Arc<Mutex<Vec<(String, Value)>>>) {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for topic in [
            topics::SENSOR_GAS,
            topics::SENSOR_GPS,
            topics::SENSOR_TEMPERATURE,
            topics::SENSOR_HUMIDITY,
            topics::SENSOR_ACCELEROMETER,
            topics::SENSOR_GYROSCOPE,
            topics::CONNECTION_STATUS,
            topics::CONNECTION_ERROR,
        ] {
            let seen = Arc::clone(&seen);
            bus.subscribe(topic, "recorder", move |payload| {
                seen.lock().push((topic.to_string(), payload.clone()));
            });
        }

        (bus, seen)
    }

    #[tokio::test]
    async fn test_single_sensor_routing() {
        let (bus, seen) = recording_bus();
        let dispatch = bus.start_dispatch();

        route_message(&bus, json!({"type": "gas", "value": 42.5}));
        route_message(&bus, json!({"type": "gps", "latitude": 1.0, "longitude": 2.0}));

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.close();
        let _ = dispatch.await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "sensor.gas");
        assert_eq!(seen[0].1["value"], 42.5);
        assert_eq!(seen[1].0, "sensor.gps");
    }

    #[tokio::test]
    async fn test_combined_packet_is_decomposed() {
        let (bus, seen) = recording_bus();
        let dispatch = bus.start_dispatch();

        route_message(
            &bus,
            json!({
                "type": "combined",
                "sensors": {"gas": 10, "temperature": 20, "mystery": 99}
            }),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.close();
        let _ = dispatch.await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&("sensor.gas".to_string(), json!(10))));
        assert!(seen.contains(&("sensor.temperature".to_string(), json!(20))));
    }

    #[tokio::test]
    async fn test_unknown_discriminator_produces_no_publish() {
        let (bus, seen) = recording_bus();
        let dispatch = bus.start_dispatch();

        route_message(&bus, json!({"type": "unknown_sensor", "value": 1}));
        route_message(&bus, json!({"value": 1}));

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.close();
        let _ = dispatch.await;

        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_worker_errors_reach_the_error_topic() {
        let (bus, seen) = recording_bus();
        let dispatch = bus.start_dispatch();

        route_worker_event(&bus, WorkerEvent::Error("Receive error: reset".to_string()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.close();
        let _ = dispatch.await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "connection.error");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manager_routes_live_tcp_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (bus, seen) = recording_bus();
        let dispatch = bus.start_dispatch();

        let desc = ConnDescriptor {
            host: "127.0.0.1".to_string(),
            port,
            transport: Transport::Tcp,
        };
        let mut manager = IngestionManager::new(Arc::clone(&bus), desc)
            .with_reconnect_wait(Duration::from_millis(100));
        manager.start().unwrap();

        // Second start must fail fast while the worker is running
        assert!(manager.start().is_err());

        let mut conn = listener.accept().unwrap().0;
        conn.write_all(b"{\"type\":\"gas\",\"value\":42.5}\n").unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        manager.stop().await.unwrap();
        bus.close();
        let _ = dispatch.await;

        let seen = seen.lock();
        assert!(
            seen.iter()
                .any(|(topic, payload)| topic == "connection.status_changed"
                    && payload["connected"] == true)
        );
        assert!(
            seen.iter()
                .any(|(topic, payload)| topic == "sensor.gas" && payload["value"] == 42.5)
        );
    }

    #[test]
    fn test_send_command_when_not_running() {
        let bus = Arc::new(EventBus::new());
        let desc = ConnDescriptor {
            host: "127.0.0.1".to_string(),
            port: 1,
            transport: Transport::Tcp,
        };
        let manager = IngestionManager::new(bus, desc);

        assert!(!manager.send_command("calibrate", json!({"sensor": "gas"})));
    }
}
