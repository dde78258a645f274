use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

/// Encoding of the bytes held by an [`ImageBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageEncoding {
    /// Uncompressed RGB24 pixels, row-major
    Raw { width: u32, height: u32 },
    /// JPEG compressed frame
    Jpeg,
}

impl ImageEncoding {
    /// Bytes per pixel for uncompressed encodings
    pub const RAW_BYTES_PER_PIXEL: usize = 3;

    /// Check if encoding is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, ImageEncoding::Jpeg)
    }

    /// Expected byte length for uncompressed encodings.
    ///
    /// `None` for compressed encodings and for dimensions whose size does not
    /// fit in `usize`.
    pub fn expected_size(&self) -> Option<usize> {
        match self {
            ImageEncoding::Raw { width, height } => Self::raw_size(*width, *height),
            ImageEncoding::Jpeg => None,
        }
    }

    /// Byte length of an RGB24 frame, or `None` on overflow
    pub fn raw_size(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(Self::RAW_BYTES_PER_PIXEL)
    }
}

/// Immutable captured or encoded frame.
///
/// The bytes are shared behind an `Arc`, so handing a buffer to a passive
/// consumer (preview) never copies the frame and never allows mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    data: Arc<[u8]>,
    encoding: ImageEncoding,
    captured_at: SystemTime,
}

impl ImageBuffer {
    pub fn new(data: Vec<u8>, encoding: ImageEncoding) -> Self {
        Self::with_timestamp(data, encoding, SystemTime::now())
    }

    pub fn with_timestamp(data: Vec<u8>, encoding: ImageEncoding, captured_at: SystemTime) -> Self {
        Self {
            data: data.into(),
            encoding,
            captured_at,
        }
    }

    /// Build a raw RGB24 frame from rows that may carry padding.
    ///
    /// Video buffers pad each row to a 4-byte boundary, so a width whose
    /// row length is not a multiple of 4 arrives with trailing bytes per
    /// row. Accepts either tight or 4-byte-aligned rows; anything else is
    /// `None`.
    pub fn from_padded_rgb(data: &[u8], width: u32, height: u32) -> Option<Self> {
        let encoding = ImageEncoding::Raw { width, height };
        let tight = ImageEncoding::raw_size(width, height)?;
        if data.len() == tight {
            return Some(Self::new(data.to_vec(), encoding));
        }

        let row = (width as usize).checked_mul(ImageEncoding::RAW_BYTES_PER_PIXEL)?;
        let stride = row.checked_add(3)? & !3;
        if stride == row || data.len() != stride.checked_mul(height as usize)? {
            return None;
        }

        let mut pixels = Vec::with_capacity(tight);
        for padded in data.chunks_exact(stride) {
            pixels.extend_from_slice(&padded[..row]);
        }
        Some(Self::new(pixels, encoding))
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self::new(data, ImageEncoding::Jpeg)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn encoding(&self) -> ImageEncoding {
        self.encoding
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Validate data size against the size implied by the encoding
    pub fn validate_size(&self) -> bool {
        match self.encoding {
            // Oversized dimensions never describe a valid frame
            ImageEncoding::Raw { width, height } => {
                ImageEncoding::raw_size(width, height) == Some(self.data.len())
            }
            ImageEncoding::Jpeg => !self.data.is_empty(),
        }
    }
}

/// Label to confidence mapping returned by the classifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationResult {
    labels: HashMap<String, f32>,
}

impl AnnotationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label. Scores are clamped to `0.0..=1.0`, NaN becomes `0.0`,
    /// and a repeated label replaces the previous score.
    pub fn insert<S: Into<String>>(&mut self, label: S, score: f32) {
        let score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
        self.labels.insert(label.into(), score);
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.labels.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.labels.iter().map(|(label, score)| (label.as_str(), *score))
    }

    /// Labels ordered by descending confidence, ties broken by name
    pub fn ranked(&self) -> Vec<(String, f32)> {
        let mut ranked: Vec<(String, f32)> = self
            .labels
            .iter()
            .map(|(label, score)| (label.clone(), *score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Short human-readable summary used in logs
    pub fn summary(&self, limit: usize) -> String {
        let ranked = self.ranked();
        if ranked.is_empty() {
            return "no labels".to_string();
        }
        ranked
            .iter()
            .take(limit)
            .map(|(label, score)| format!("{} ({:.2})", label, score))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for AnnotationResult {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (label, score) in iter {
            result.insert(label, score);
        }
        result
    }
}

/// The unit published downstream: an encoded image plus its annotations
#[derive(Debug, Clone)]
pub struct DoorbellEvent {
    id: Uuid,
    image: ImageBuffer,
    annotations: AnnotationResult,
    created_at: SystemTime,
}

impl DoorbellEvent {
    pub fn new(image: ImageBuffer, annotations: AnnotationResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            image,
            annotations,
            created_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> &ImageBuffer {
        &self.image
    }

    pub fn annotations(&self) -> &AnnotationResult {
        &self.annotations
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}
