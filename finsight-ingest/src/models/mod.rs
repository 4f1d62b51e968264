//! Domain models for finsight-ingest

pub mod catalog;
pub mod raw_image;
pub mod sighting;

pub use catalog::{
    CatalogEntry, CatalogEntryDetails, ConservationStatus, SpeciesProfile, WaterType,
};
pub use raw_image::RawImageState;
pub use sighting::{Device, Sighting, SightingOutcome, SightingWithEntry};
