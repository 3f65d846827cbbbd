use std::io::Cursor;

use fragments_core::{CoreError, ValidationError};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat};

use crate::format::Format;

fn image_format(f: Format) -> Result<ImageFormat, CoreError> {
    f.image_format()
        .ok_or_else(|| CoreError::Conversion(format!("{} is not an image format", f.essence())))
}

pub fn decode(data: &[u8], format: ImageFormat) -> Result<DynamicImage, CoreError> {
    image::load_from_memory_with_format(data, format)
        .map_err(|e| CoreError::Conversion(format!("cannot decode {format:?} image: {e}")))
}

/// Encode `img` as `format`. JPEG has no alpha channel, and the GIF and WebP
/// encoders only take 8-bit RGB(A), so pixels are normalised first.
pub fn encode(img: &DynamicImage, format: ImageFormat, jpeg_quality: u8) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    let res = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, jpeg_quality)),
        ImageFormat::Gif | ImageFormat::WebP => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut Cursor::new(&mut buf), format)
        }
        _ => img.write_to(&mut Cursor::new(&mut buf), format),
    };
    res.map_err(|e| CoreError::Conversion(format!("cannot encode {format:?} image: {e}")))?;
    Ok(buf)
}

pub fn transcode(data: &[u8], from: Format, to: Format, jpeg_quality: u8) -> Result<Vec<u8>, CoreError> {
    if from == to {
        return Ok(data.to_vec());
    }
    let img = decode(data, image_format(from)?)?;
    encode(&img, image_format(to)?, jpeg_quality)
}

/// Fail with `InvalidData` unless `data` sniffs as `declared`.
pub fn ensure_format(data: &[u8], declared: Format) -> Result<(), CoreError> {
    let expected = image_format(declared)?;
    match image::guess_format(data) {
        Ok(found) if found == expected => Ok(()),
        Ok(found) => Err(ValidationError::InvalidData(format!(
            "declared {} but data is {found:?}",
            declared.essence()
        ))
        .into()),
        Err(_) => Err(ValidationError::InvalidData(format!(
            "data is not a recognisable {} image",
            declared.essence()
        ))
        .into()),
    }
}

/// Re-encode JPEG data at `quality`. Undecodable input is the caller's data
/// problem, so it surfaces as `InvalidData`.
pub fn compress_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>, CoreError> {
    ensure_format(data, Format::Jpeg)?;
    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| ValidationError::InvalidData(format!("cannot decode jpeg: {e}")))?;
    encode(&img, ImageFormat::Jpeg, quality)
}
