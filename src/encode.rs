use crate::error::EncodeError;
use crate::frame::{ImageBuffer, ImageEncoding};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat};
use tracing::debug;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Encode a captured frame as JPEG at `quality` (1-100).
///
/// Raw RGB24 frames are compressed directly; frames that are already JPEG
/// are decoded and re-encoded so the output quality is always `quality`.
/// The capture timestamp carries over to the encoded buffer.
pub fn encode_jpeg(image: &ImageBuffer, quality: u8) -> Result<ImageBuffer, EncodeError> {
    let quality = quality.clamp(1, 100);

    let (pixels, width, height) = match image.encoding() {
        ImageEncoding::Raw { width, height } => {
            let expected = ImageEncoding::raw_size(width, height)
                .ok_or(EncodeError::RawTooLarge { width, height })?;
            if image.len() != expected {
                return Err(EncodeError::InvalidRaw {
                    expected,
                    actual: image.len(),
                });
            }
            (image.bytes().to_vec(), width, height)
        }
        ImageEncoding::Jpeg => {
            let decoded = image::load_from_memory_with_format(image.bytes(), ImageFormat::Jpeg)
                .map_err(|e| EncodeError::Decode {
                    details: e.to_string(),
                })?
                .to_rgb8();
            let (width, height) = decoded.dimensions();
            (decoded.into_raw(), width, height)
        }
    };

    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, quality)
        .encode(&pixels, width, height, ColorType::Rgb8)
        .map_err(|e| EncodeError::Encode {
            details: e.to_string(),
        })?;

    debug!(
        "Encoded {}x{} frame at quality {} ({} -> {} bytes)",
        width,
        height,
        quality,
        image.len(),
        output.len()
    );

    Ok(ImageBuffer::with_timestamp(
        output,
        ImageEncoding::Jpeg,
        image.captured_at(),
    ))
}
