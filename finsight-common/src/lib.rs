//! # Finsight Common Library
//!
//! Shared code for the finsight service crates including:
//! - Error taxonomy (`Error` enum) and result alias
//! - Pipeline event types (`PipelineEvent` enum) and the event bus
//! - Configuration loading and validation
//! - Queue wire contracts (cutting/enrichment job payloads)

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
