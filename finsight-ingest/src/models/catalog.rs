//! Catalog entry models
//!
//! [`SpeciesProfile`] is the external-boundary shape: what the language
//! model is instructed to return from a full extraction call (camelCase
//! wire names). [`CatalogEntry`] is the persisted row. Conversion happens
//! exactly once, in the catalog store's find-or-create.

use chrono::{DateTime, Utc};
use finsight_common::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Habitat water classification
///
/// The extraction prompt instructs lowercase values; accept either case
/// on the wire, serialize capitalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterType {
    #[serde(alias = "freshwater")]
    Freshwater,
    #[serde(alias = "saltwater")]
    Saltwater,
    #[serde(alias = "brackish")]
    Brackish,
}

impl WaterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaterType::Freshwater => "Freshwater",
            WaterType::Saltwater => "Saltwater",
            WaterType::Brackish => "Brackish",
        }
    }
}

impl FromStr for WaterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Freshwater" => Ok(WaterType::Freshwater),
            "Saltwater" => Ok(WaterType::Saltwater),
            "Brackish" => Ok(WaterType::Brackish),
            other => Err(Error::InvalidInput(format!("Unknown water type: {}", other))),
        }
    }
}

/// IUCN-style conservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConservationStatus {
    #[serde(rename = "Least Concern")]
    LeastConcern,
    #[serde(rename = "Near Threatened")]
    NearThreatened,
    Vulnerable,
    Endangered,
    #[serde(rename = "Critically Endangered")]
    CriticallyEndangered,
    #[serde(rename = "Extinct in the Wild")]
    ExtinctInTheWild,
    Extinct,
    #[serde(rename = "Data Deficient")]
    DataDeficient,
}

impl ConservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConservationStatus::LeastConcern => "Least Concern",
            ConservationStatus::NearThreatened => "Near Threatened",
            ConservationStatus::Vulnerable => "Vulnerable",
            ConservationStatus::Endangered => "Endangered",
            ConservationStatus::CriticallyEndangered => "Critically Endangered",
            ConservationStatus::ExtinctInTheWild => "Extinct in the Wild",
            ConservationStatus::Extinct => "Extinct",
            ConservationStatus::DataDeficient => "Data Deficient",
        }
    }
}

impl FromStr for ConservationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Least Concern" => Ok(ConservationStatus::LeastConcern),
            "Near Threatened" => Ok(ConservationStatus::NearThreatened),
            "Vulnerable" => Ok(ConservationStatus::Vulnerable),
            "Endangered" => Ok(ConservationStatus::Endangered),
            "Critically Endangered" => Ok(ConservationStatus::CriticallyEndangered),
            "Extinct in the Wild" => Ok(ConservationStatus::ExtinctInTheWild),
            "Extinct" => Ok(ConservationStatus::Extinct),
            "Data Deficient" => Ok(ConservationStatus::DataDeficient),
            other => Err(Error::InvalidInput(format!(
                "Unknown conservation status: {}",
                other
            ))),
        }
    }
}

/// Candidate catalog entry as returned by the full extraction call.
///
/// Field names are the instructed response contract; scalar attributes
/// are required (a response missing one is a parse failure), the related
/// collections default to empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesProfile {
    /// Species common name; the catalog deduplication key
    pub name: String,
    pub family: String,
    /// Adult size range, centimeters
    pub min_size: f64,
    pub max_size: f64,
    pub water_type: WaterType,
    pub description: String,
    pub color_description: String,
    /// Typical depth range, meters
    pub depth_range_min: f64,
    pub depth_range_max: f64,
    pub environment: String,
    pub region: String,
    pub conservation_status: ConservationStatus,
    pub cons_status_description: String,
    /// Model's self-assessed identification accuracy, 0-100
    pub ai_accuracy: f64,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub predators: Vec<String>,
    #[serde(default)]
    pub fun_facts: Vec<String>,
}

/// A persisted species entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub name: String,
    pub family: String,
    pub min_size: f64,
    pub max_size: f64,
    pub water_type: WaterType,
    pub description: String,
    pub color_description: String,
    pub depth_range_min: f64,
    pub depth_range_max: f64,
    pub environment: String,
    pub region: String,
    pub conservation_status: ConservationStatus,
    pub cons_status_description: String,
    pub ai_accuracy: f64,
    pub created_at: DateTime<Utc>,
}

/// A catalog entry together with its related collections
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntryDetails {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub colors: Vec<String>,
    pub predators: Vec<String>,
    pub fun_facts: Vec<String>,
}
