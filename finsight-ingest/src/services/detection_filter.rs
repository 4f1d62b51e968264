//! Fish detection filtering
//!
//! Reduces raw object-detection output to the detections worth cropping:
//! objects that carry a fish-like tag and that the provider is
//! confident about. The keyword pass and the confidence pass are
//! independent: the keyword may match any tag on the object, while the
//! confidence gate applies to the object's top tag.

use crate::services::vision_client::{DetectedObject, ObjectTag, VisionClient};
use finsight_common::types::{BoundingBox, Detection};
use finsight_common::Result;

/// Tags containing any of these (case-insensitive substring) mark an
/// object as fish-like. Compound names such as "swordfish" or "rainbow
/// trout" match through their base keyword.
pub const FISH_KEYWORDS: [&str; 30] = [
    "fish",
    "shark",
    "dolphin",
    "eel",
    "ray",
    "trout",
    "salmon",
    "bass",
    "carp",
    "catfish",
    "tuna",
    "cod",
    "mackerel",
    "anchovy",
    "sardine",
    "herring",
    "perch",
    "pike",
    "tilapia",
    "snapper",
    "grouper",
    "barracuda",
    "flounder",
    "halibut",
    "sole",
    "sturgeon",
    "swordfish",
    "marlin",
    "manta",
    "stingray",
];

/// Detections at or below this confidence are discarded.
pub const CONFIDENCE_THRESHOLD: f64 = 0.65;

/// Runs vision analysis and keeps only confident fish detections.
pub struct DetectionFilter {
    vision: VisionClient,
}

impl DetectionFilter {
    pub fn new(vision: VisionClient) -> Self {
        Self { vision }
    }

    /// Analyze an image and return the fish detections in it.
    ///
    /// An empty result means "no fish", which is a normal outcome and
    /// never an error.
    pub async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>> {
        let objects = self.vision.analyze(image).await?;
        let total = objects.len();
        let detections = filter_objects(objects);

        tracing::debug!(
            objects = total,
            fish = detections.len(),
            "Filtered detections"
        );
        Ok(detections)
    }
}

/// Keep objects that (a) have a bounding box, (b) carry at least one
/// fish-like tag, and (c) whose top tag confidence strictly exceeds
/// [`CONFIDENCE_THRESHOLD`].
pub fn filter_objects(objects: Vec<DetectedObject>) -> Vec<Detection> {
    objects
        .into_iter()
        .filter_map(|object| {
            // No box means nothing to crop later
            let bbox = object.bounding_box?;

            if !object.tags.iter().any(|tag| is_fish_tag(&tag.name)) {
                return None;
            }

            let top = top_tag(&object.tags)?;
            if top.confidence <= CONFIDENCE_THRESHOLD {
                return None;
            }

            Some(Detection {
                tag_name: top.name.clone(),
                confidence: top.confidence,
                bounding_box: BoundingBox {
                    left: bbox.x,
                    top: bbox.y,
                    width: bbox.w,
                    height: bbox.h,
                },
            })
        })
        .collect()
}

fn is_fish_tag(tag: &str) -> bool {
    let lowered = tag.to_lowercase();
    FISH_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn top_tag(tags: &[ObjectTag]) -> Option<&ObjectTag> {
    tags.iter().max_by(|a, b| {
        a.confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}
