//! Helmet network link
//!
//! Maintains the socket connection to the helmet (TCP with reconnect, or UDP),
//! frames and decodes its newline-delimited JSON telemetry, and routes decoded
//! messages onto event bus topics by sensor type.

pub mod framing;
pub mod manager;
pub mod types;
pub mod worker;

pub use manager::IngestionManager;
pub use types::{ConnDescriptor, ConnState, ConnStatus, SensorKind, WorkerEvent};
pub use worker::{NetWorker, WorkerHandle};
