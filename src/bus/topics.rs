//! Standard event topics used throughout the application

// Connection events
pub const CONNECTION_STATUS: &str = "connection.status_changed";
pub const CONNECTION_ERROR: &str = "connection.error";

// Sensor events
pub const SENSOR_GAS: &str = "sensor.gas";
pub const SENSOR_GPS: &str = "sensor.gps";
pub const SENSOR_TEMPERATURE: &str = "sensor.temperature";
pub const SENSOR_HUMIDITY: &str = "sensor.humidity";
pub const SENSOR_ACCELEROMETER: &str = "sensor.accelerometer";
pub const SENSOR_GYROSCOPE: &str = "sensor.gyroscope";

// ML events (published by the fall-detection consumer, input is IMU samples
// from the accelerometer/gyroscope topics above)
pub const ML_PREDICTION: &str = "ml.prediction";

// Alert events
pub const ALERT_FALL_DETECTED: &str = "alert.fall_detected";
pub const ALERT_GAS_THRESHOLD: &str = "alert.gas_threshold";

// Log events
pub const LOG_ENTRY: &str = "log.entry";
