use super::PreviewError;
use image::ImageReader;
use std::io::Cursor;

/// Read pixel dimensions from an encoded image without decoding pixels
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32), PreviewError> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(PreviewError::UnsupportedFormat(
            "unrecognized image format".to_string(),
        ));
    }

    Ok(reader.into_dimensions()?)
}
