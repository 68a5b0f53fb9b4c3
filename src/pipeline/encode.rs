//! Image encoding: `DynamicImage` → PNG bytes handed to the OCR engine.
//!
//! PNG is lossless, so glyph edges survive exactly as rendered. Pages are
//! converted to 8-bit greyscale first: the scans carry no colour information
//! the recogniser uses, and a single channel cuts the encoded size by
//! roughly two thirds for every page held in a batch.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::trace;

/// Encode a rasterised page as a greyscale PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let grey = DynamicImage::ImageLuma8(img.to_luma8());
    let mut buf = Vec::new();
    grey.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;

    trace!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 12, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .expect("valid PNG");
        assert_eq!((decoded.width(), decoded.height()), (10, 12));
        assert!(matches!(decoded, DynamicImage::ImageLuma8(_)));
    }
}
