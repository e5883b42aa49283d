//! Preparing user files for object storage: size limit, storage name, and
//! downscaling of large images.

use std::io::Cursor;

use image::{imageops::FilterType, GenericImageView, ImageFormat, ImageReader};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug)]
pub struct PreparedUpload {
    /// Object path inside the bucket, `{uuid}.{ext}`.
    pub path: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Extension taken from the client's file name, falling back to one derived
/// from the MIME type.
fn extension(file_name: &str, content_type: &str) -> String {
    let from_name = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match from_name {
        Some(ext) => ext.to_ascii_lowercase(),
        None => match content_type {
            "image/jpeg" => "jpg".to_string(),
            "image/png" => "png".to_string(),
            "image/gif" => "gif".to_string(),
            "image/webp" => "webp".to_string(),
            "application/pdf" => "pdf".to_string(),
            "text/plain" => "txt".to_string(),
            _ => "bin".to_string(),
        },
    }
}

/// Shrink a JPEG or PNG so its longer side is at most `max_dimension`.
/// Returns `None` when the image is already small enough, cannot be decoded,
/// or the re-encoded file would not be smaller.
fn downscale(bytes: &[u8], content_type: &str, max_dimension: u32) -> Option<Vec<u8>> {
    let format = match content_type {
        "image/jpeg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        _ => return None,
    };

    let image = ImageReader::with_format(Cursor::new(bytes), format)
        .decode()
        .map_err(|e| tracing::debug!("Skipping resize, decode failed: {}", e))
        .ok()?;

    let (width, height) = image.dimensions();
    if width.max(height) <= max_dimension {
        return None;
    }

    let resized = image.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, format).ok()?;
    let out = out.into_inner();

    (out.len() < bytes.len()).then_some(out)
}

/// Validate and normalize an uploaded file.
pub fn prepare(
    file_name: &str,
    content_type: &str,
    bytes: Vec<u8>,
    max_bytes: usize,
    max_dimension: u32,
) -> Result<PreparedUpload, AppError> {
    if bytes.is_empty() {
        return Err(AppError::Validation("File is empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::PayloadTooLarge(max_bytes));
    }

    let content_type = if content_type.trim().is_empty() {
        "application/octet-stream".to_string()
    } else {
        content_type.to_string()
    };

    let bytes = match downscale(&bytes, &content_type, max_dimension) {
        Some(smaller) => {
            tracing::debug!(from = bytes.len(), to = smaller.len(), "Downscaled image");
            smaller
        }
        None => bytes,
    };

    Ok(PreparedUpload {
        path: format!("{}.{}", Uuid::new_v4(), extension(file_name, &content_type)),
        bytes,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn rejects_oversized_files() {
        let err = prepare("big.bin", "application/octet-stream", vec![0; 11], 10, 1920).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(10)));
    }

    #[test]
    fn rejects_empty_files() {
        let err = prepare("empty.txt", "text/plain", Vec::new(), 10, 1920).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn names_objects_by_uuid_and_extension() {
        let prepared = prepare("Notes.PDF", "application/pdf", vec![1, 2, 3], 100, 1920).unwrap();
        assert!(prepared.path.ends_with(".pdf"));
        assert_eq!(prepared.path.len(), 36 + 4);
        assert_eq!(prepared.bytes, vec![1, 2, 3]);

        let unnamed = prepare("blob", "image/png", vec![1], 100, 1920).unwrap();
        assert!(unnamed.path.ends_with(".png"));
    }

    #[test]
    fn large_images_are_downscaled() {
        let original = png(400, 200);
        let prepared = prepare("wide.png", "image/png", original.clone(), usize::MAX, 100).unwrap();

        let decoded = image::load_from_memory(&prepared.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
        assert!(prepared.bytes.len() < original.len());
    }

    #[test]
    fn small_images_are_untouched() {
        let original = png(20, 20);
        let prepared = prepare("icon.png", "image/png", original.clone(), usize::MAX, 100).unwrap();
        assert_eq!(prepared.bytes, original);
    }
}
