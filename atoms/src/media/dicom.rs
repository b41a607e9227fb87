//! DICOM to JPEG conversion for browser previews.
//!
//! Pixel data is decoded, the embedded VOI LUT / window is applied when the
//! object carries one (min-max normalization otherwise), and the result is
//! forced to 8 bits: grayscale for single-sample images, RGB otherwise.

use dicom_object::OpenFileOptions;
use dicom_pixeldata::image::codecs::jpeg::JpegEncoder;
use dicom_pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const PREVIEW_JPEG_QUALITY: u8 = 75;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("not a DICOM object: {0}")]
    Parse(String),
    #[error("failed to decode DICOM pixel data: {0}")]
    PixelData(String),
    #[error("failed to encode JPEG preview: {0}")]
    Encode(String),
}

/// Skip the 128-byte preamble when present; the reader expects the magic code first.
fn strip_preamble(bytes: &[u8]) -> &[u8] {
    match bytes.get(PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()) {
        Some(magic) if magic == MAGIC => &bytes[PREAMBLE_LEN..],
        _ => bytes,
    }
}

pub fn dicom_to_jpeg(bytes: &[u8]) -> Result<Vec<u8>, PreviewError> {
    let object = OpenFileOptions::new()
        .from_reader(strip_preamble(bytes))
        .map_err(|e| PreviewError::Parse(e.to_string()))?;

    let pixels = object
        .decode_pixel_data()
        .map_err(|e| PreviewError::PixelData(e.to_string()))?;

    let options = ConvertOptions::new()
        .with_voi_lut(VoiLutOption::Default)
        .force_8bit();
    let image = pixels
        .to_dynamic_image_with_options(0, &options)
        .map_err(|e| PreviewError::PixelData(e.to_string()))?;

    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, PREVIEW_JPEG_QUALITY);
        let encoded = if pixels.samples_per_pixel() == 1 {
            encoder.encode_image(&image.to_luma8())
        } else {
            encoder.encode_image(&image.to_rgb8())
        };
        encoded.map_err(|e| PreviewError::Encode(e.to_string()))?;
    }

    Ok(out)
}
