//! HTTP API handlers for finsight-ingest
//!
//! Devices upload frames and register themselves here; the catalog and
//! sighting history are read out here; progress streams out over SSE.

pub mod catalog;
pub mod chat;
pub mod devices;
pub mod health;
pub mod ingest;
pub mod sse;

pub use catalog::catalog_routes;
pub use chat::chat_routes;
pub use devices::device_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
pub use sse::event_stream;
