use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat};

use crate::error::ImageError;

/// PNG-encode an image and return it as standard base64 text
pub fn encode_png_base64(image: &DynamicImage) -> Result<String, ImageError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(bytes))
}

/// Decode a base64 image payload. Accepts raw base64 or a data URL
/// (`data:image/png;base64,...`).
pub fn decode_base64_image(payload: &str) -> Result<DynamicImage, ImageError> {
    let encoded = match payload.find("base64,") {
        Some(idx) => &payload[idx + "base64,".len()..],
        None => payload,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ImageError::Decode(e.to_string()))?;
    image::load_from_memory(&bytes).map_err(|e| ImageError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn sample() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(6, 4, |x, y| Luma([(x * 40 + y) as u8])))
    }

    #[test]
    fn test_data_url_prefix_is_stripped() {
        let encoded = encode_png_base64(&sample()).unwrap();
        let url = format!("data:image/png;base64,{}", encoded);
        let decoded = decode_base64_image(&url).unwrap();
        assert_eq!(decoded.width(), 6);
        assert_eq!(decoded.height(), 4);
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        assert!(matches!(
            decode_base64_image("not an image"),
            Err(ImageError::Decode(_))
        ));
        // valid base64, not a png
        assert!(matches!(
            decode_base64_image("aGVsbG8gd29ybGQ="),
            Err(ImageError::Decode(_))
        ));
    }
}
