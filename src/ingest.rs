//! Image ingestion and the size-constraint solver.
//!
//! A selected file becomes a data URL that is guaranteed to fit under the
//! byte ceiling. Originals that already fit are kept untouched; oversized
//! images go through a bounded greedy downscale loop that trades resolution
//! and JPEG quality until the estimate fits or the attempts run out.

use crate::error::{EnhancerError, Result};
use crate::settings::ReferenceImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

/// Byte ceiling for a single reference image (estimated, not exact).
pub const MAX_IMAGE_BYTES: usize = 4 * 1024 * 1024;

/// Re-encode attempts before giving up on an oversized image.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

const START_QUALITY: f32 = 0.92;
const MIN_QUALITY: f32 = 0.5;
const QUALITY_STEP: f32 = 0.07;
const SCALE_STEP: f32 = 0.9;

/// Encodes raw bytes as a base64 data URL with the given MIME type.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    use base64::Engine;
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Estimates the decoded byte size of a data URL from its base64 length.
///
/// `ceil(len * 3 / 4)`: exact size is unknowable without decoding, and the
/// ceiling is enforced against this estimate everywhere.
pub fn estimated_bytes(data_url: &str) -> usize {
    let encoded = data_url
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or("");
    (encoded.len() * 3).div_ceil(4)
}

/// One step of the shrink schedule: dimensions scale by 0.9 (floored, at
/// least 1px) and quality drops by 0.07 (floored at 0.5).
pub(crate) fn next_attempt(width: u32, height: u32, quality: f32) -> (u32, u32, f32) {
    (
        ((width as f32 * SCALE_STEP).floor() as u32).max(1),
        ((height as f32 * SCALE_STEP).floor() as u32).max(1),
        (quality - QUALITY_STEP).max(MIN_QUALITY),
    )
}

fn encode_jpeg_data_url(
    bitmap: &DynamicImage,
    width: u32,
    height: u32,
    quality: f32,
) -> Result<String> {
    // Always scale from the original bitmap, never a prior attempt's output.
    let frame = if width == bitmap.width() && height == bitmap.height() {
        bitmap.to_rgb8()
    } else {
        bitmap
            .resize_exact(width, height, FilterType::Triangle)
            .to_rgb8()
    };

    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, (quality * 100.0).round() as u8);
    encoder.encode_image(&frame)?;
    Ok(encode_data_url("image/jpeg", &encoded))
}

/// Builder for [`ImageIngestor`].
#[derive(Debug, Clone)]
pub struct ImageIngestorBuilder {
    max_bytes: usize,
    max_attempts: u32,
}

impl Default for ImageIngestorBuilder {
    fn default() -> Self {
        Self {
            max_bytes: MAX_IMAGE_BYTES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ImageIngestorBuilder {
    /// Creates a builder with the default ceiling and attempt bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the byte ceiling.
    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Overrides the re-encode attempt bound.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Builds the ingestor.
    pub fn build(self) -> ImageIngestor {
        ImageIngestor {
            max_bytes: self.max_bytes,
            max_attempts: self.max_attempts,
        }
    }
}

/// Turns selected files into reference image entries bounded by the ceiling.
#[derive(Debug, Clone)]
pub struct ImageIngestor {
    max_bytes: usize,
    max_attempts: u32,
}

impl Default for ImageIngestor {
    fn default() -> Self {
        ImageIngestorBuilder::default().build()
    }
}

impl ImageIngestor {
    /// Returns a builder for custom limits.
    pub fn builder() -> ImageIngestorBuilder {
        ImageIngestorBuilder::new()
    }

    /// Reads and ingests the file at `path`, naming the entry after it.
    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<ReferenceImage> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        self.ingest_bytes(name, &bytes)
    }

    /// Ingests already-read file bytes.
    ///
    /// Anything whose encoding fits the ceiling is accepted as-is (no quality
    /// loss, and no requirement that it even decodes as an image). Oversized
    /// input must decode so the downscale loop can run; failure there, or an
    /// exhausted loop, leaves nothing mutated anywhere.
    pub fn ingest_bytes(&self, name: impl Into<String>, bytes: &[u8]) -> Result<ReferenceImage> {
        let mime = image::guess_format(bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        let original = encode_data_url(mime, bytes);

        let data_url = if estimated_bytes(&original) <= self.max_bytes {
            original
        } else {
            let bitmap = image::load_from_memory(bytes)?;
            self.downscale_to_limit(&bitmap)?
        };

        Ok(ReferenceImage {
            name: name.into(),
            data_url,
        })
    }

    /// Greedy re-encode loop: the first attempt that fits wins.
    pub(crate) fn downscale_to_limit(&self, bitmap: &DynamicImage) -> Result<String> {
        let mut width = bitmap.width();
        let mut height = bitmap.height();
        let mut quality = START_QUALITY;

        for attempt in 0..self.max_attempts {
            let data_url = encode_jpeg_data_url(bitmap, width, height, quality)?;
            let estimate = estimated_bytes(&data_url);
            if estimate <= self.max_bytes {
                tracing::debug!(attempt, width, height, quality, estimate, "image fits ceiling");
                return Ok(data_url);
            }
            (width, height, quality) = next_attempt(width, height, quality);
        }

        Err(EnhancerError::CompressionLimitExceeded {
            limit: self.max_bytes,
            attempts: self.max_attempts,
        })
    }
}
