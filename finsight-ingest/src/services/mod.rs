//! Service modules for the photo ingest pipeline
//!
//! External provider clients (vision analysis, language model) plus the
//! pure helpers that sit between them: detection filtering, crop
//! geometry, and upload/enqueue dispatch.

pub mod cropping;
pub mod cut_dispatcher;
pub mod detection_filter;
pub mod language_model;
pub mod vision_client;

pub use cropping::{bounded_jpeg, clamp_region, crop_jpeg, decode_image, CropRegion};
pub use cut_dispatcher::{CutDispatcher, DispatchReceipt};
pub use detection_filter::{filter_objects, DetectionFilter, CONFIDENCE_THRESHOLD};
pub use language_model::{ChatCompletionsClient, LanguageModel, LmError};
pub use vision_client::{DetectedObject, ObjectTag, VisionClient, VisionError};
