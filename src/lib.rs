//! helmetd - Smart Helmet telemetry ingestion daemon
//!
//! This crate provides the ingestion core for the Smart Helmet monitoring
//! system, including:
//! - Topic-keyed publish/subscribe event bus with a single dispatch context
//! - Configuration store backed by a dotted-path JSON document
//! - Network worker for the helmet's TCP/UDP telemetry link
//! - Ingestion manager that classifies sensor messages onto bus topics
//!
//! Consumers (dashboards, log sinks, alerting) subscribe to bus topics and
//! never talk to the network layer directly.

// Event bus
pub mod bus;

// Configuration store
pub mod config;

// Helmet network link (worker, framing, ingestion manager)
pub mod net;

// Shared error types
pub mod types;
