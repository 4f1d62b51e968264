//! Crop geometry and JPEG re-encoding
//!
//! Detection bounding boxes arrive as floating-point pixel coordinates
//! that may overhang the image edges. Coordinates are floored, clamped
//! to the image bounds, and regions that end up with no area are
//! skipped rather than treated as errors.

use finsight_common::types::BoundingBox;
use finsight_common::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;

/// JPEG quality for crops and model-bound re-encodes.
const JPEG_QUALITY: u8 = 90;

/// Longest edge allowed on images submitted to the language model.
pub const MODEL_IMAGE_MAX_EDGE: u32 = 768;

/// A crop region fully contained in its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Clamp a detection bounding box to the image bounds.
///
/// Coordinates are floored, the origin is clamped to zero, and the
/// extent is limited to what remains of the image. Returns `None` when
/// the clamped region has no area, which happens for boxes lying
/// entirely outside the image or narrower than a pixel.
pub fn clamp_region(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Option<CropRegion> {
    let left = (bbox.left.floor() as i64).max(0);
    let top = (bbox.top.floor() as i64).max(0);
    let det_width = bbox.width.floor() as i64;
    let det_height = bbox.height.floor() as i64;

    let width = det_width.min(image_width as i64 - left);
    let height = det_height.min(image_height as i64 - top);

    if width <= 0 || height <= 0 {
        return None;
    }

    Some(CropRegion {
        left: left as u32,
        top: top as u32,
        width: width as u32,
        height: height as u32,
    })
}

/// Decode image bytes in any supported container format.
///
/// Undecodable bytes are a terminal error: the same bytes will fail the
/// same way on every redelivery.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| Error::parse("image decode", &e.to_string()))
}

/// Cut a region out of a decoded image and encode it as JPEG.
pub fn crop_jpeg(image: &DynamicImage, region: &CropRegion) -> Result<Vec<u8>> {
    let cropped = image.crop_imm(region.left, region.top, region.width, region.height);
    encode_jpeg(&cropped)
}

/// Re-encode an image as JPEG, downscaling so its longest edge does not
/// exceed `max_edge`. Images already within bounds pass through
/// unchanged.
pub fn bounded_jpeg(bytes: &[u8], max_edge: u32) -> Result<Vec<u8>> {
    let image = decode_image(bytes)?;
    let (width, height) = image.dimensions();

    if width <= max_edge && height <= max_edge {
        return Ok(bytes.to_vec());
    }

    let resized = image.resize(max_edge, max_edge, FilterType::Triangle);
    encode_jpeg(&resized)
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    image
        .write_with_encoder(encoder)
        .map_err(|e| Error::Internal(format!("JPEG encode failed: {}", e)))?;
    Ok(buffer.into_inner())
}
