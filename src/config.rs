//! Configuration Store
//!
//! Application settings as a dotted-path key/value store persisted to a JSON
//! document (`config.json`). The ingestion manager reads its connection
//! parameters from here once at startup; the settings page reads and writes
//! arbitrary keys at runtime.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::types::Result;

/// Thread-safe configuration store with file persistence
pub struct ConfigStore {
    path: PathBuf,
    doc: Mutex<Value>,
}

impl ConfigStore {
    /// Load configuration from a file
    ///
    /// A missing file is created with defaults. An unreadable or malformed
    /// file falls back to defaults without overwriting it.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let doc = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Invalid config file {}: {}, using defaults", path.display(), e);
                    default_config()
                }
            },
            Err(_) => {
                debug!("Config file {} not found, writing defaults", path.display());
                let doc = default_config();
                if let Err(e) = write_document(&path, &doc) {
                    warn!("Failed to write default config: {}", e);
                }
                doc
            }
        };

        Self {
            path,
            doc: Mutex::new(doc),
        }
    }

    /// Get a value by dotted key path (e.g. `network.port`)
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let doc = self.doc.lock();
        let mut node = &*doc;

        for part in key.split('.') {
            node = node.as_object()?.get(part)?;
        }

        serde_json::from_value(node.clone()).ok()
    }

    /// Get a value by dotted key path, or a default if absent or mistyped
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Set a value by dotted key path and persist to disk
    ///
    /// Intermediate objects are created as needed.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        self.set_no_save(key, value)?;
        self.save()
    }

    /// Set a value without persisting
    pub fn set_no_save<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let mut pending = Some(serde_json::to_value(value)?);
        let mut doc = self.doc.lock();

        let mut node = &mut *doc;
        let mut parts = key.split('.').peekable();
        while let Some(part) = parts.next() {
            if !node.is_object() {
                *node = json!({});
            }
            let Value::Object(map) = node else {
                break;
            };
            if parts.peek().is_none() {
                map.insert(part.to_string(), pending.take().unwrap_or(Value::Null));
                break;
            }
            node = map.entry(part.to_string()).or_insert_with(|| json!({}));
        }
        Ok(())
    }

    /// Get an entire section as a JSON value
    pub fn section(&self, key: &str) -> Value {
        self.get(key).unwrap_or(Value::Null)
    }

    /// Persist the current document to disk
    pub fn save(&self) -> Result<()> {
        let doc = self.doc.lock();
        write_document(&self.path, &doc)
    }

    /// Replace the document with defaults and persist
    pub fn reset_to_defaults(&self) -> Result<()> {
        *self.doc.lock() = default_config();
        self.save()
    }

    /// Re-read the document from disk, keeping current values on failure
    pub fn reload(&self) {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => *self.doc.lock() = doc,
                Err(e) => warn!("Reload failed, config file is invalid: {}", e),
            },
            Err(e) => warn!("Reload failed, cannot read config file: {}", e),
        }
    }
}

fn write_document(path: &Path, doc: &Value) -> Result<()> {
    let raw = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, raw)?;
    Ok(())
}

/// Default configuration document
fn default_config() -> Value {
    json!({
        "ui": {
            "theme": "dark",
            "sidebar_collapsed": false,
            "default_page": "Dashboard"
        },
        "network": {
            "esp32_ip": "192.168.1.100",
            "port": 8080,
            "protocol": "tcp",
            "auto_reconnect": true,
            "reconnect_interval": 5
        },
        "sensors": {
            "gas": { "enabled": true, "warning_threshold": 50, "danger_threshold": 100, "unit": "ppm" },
            "temperature": { "enabled": true, "warning_threshold": 40, "danger_threshold": 50, "unit": "°C" },
            "humidity": { "enabled": true, "unit": "%" },
            "gps": { "enabled": true, "update_interval": 1 },
            "accelerometer": { "enabled": true, "sampling_rate": 100 },
            "gyroscope": { "enabled": true, "sampling_rate": 100 }
        },
        "ml": {
            "fall_detection": {
                "enabled": true,
                "threshold": 0.7,
                "window_size": 50
            }
        },
        "alerts": {
            "sound_enabled": true,
            "notification_enabled": true,
            "log_all_events": true
        },
        "data": {
            "log_retention_days": 30,
            "export_format": "csv",
            "auto_export": false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::load(dir.path().join("config.json"))
    }

    #[test]
    fn test_defaults_and_dotted_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(
            store.get::<String>("network.esp32_ip").as_deref(),
            Some("192.168.1.100")
        );
        assert_eq!(store.get::<u16>("network.port"), Some(8080));
        assert_eq!(store.get::<String>("missing.key"), None);
        assert_eq!(store.get_or("missing.key", 42), 42);
    }

    #[test]
    fn test_set_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.set("network.port", 9000).unwrap();
        store.set("brand.new.key", "value").unwrap();

        // A second store reading the same file sees the changes
        let reread = store_in(&dir);
        assert_eq!(reread.get::<u16>("network.port"), Some(9000));
        assert_eq!(reread.get::<String>("brand.new.key").as_deref(), Some("value"));
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json at all {").unwrap();

        let store = ConfigStore::load(&path);
        assert_eq!(store.get::<u16>("network.port"), Some(8080));
    }

    #[test]
    fn test_reset_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.set("network.port", 1234).unwrap();
        store.reset_to_defaults().unwrap();
        assert_eq!(store.get::<u16>("network.port"), Some(8080));
    }
}
