use crate::ImageError;
use image::{
    DynamicImage, ImageFormat, imageops::FilterType::Lanczos3, load_from_memory,
};
use std::io::Cursor;

/// Encoders available for stored photos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Jpeg encoder. Alpha channel is dropped.
    Jpeg,
    /// PNG encoder.
    Png,
    /// WebP encoder (lossless).
    WebP,
}

impl Format {
    /// Find the format matching a file extension.
    ///
    /// Leading dot is optional and case is ignored, so `.PNG` and `png` are
    /// the same format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.strip_prefix('.').unwrap_or(extension);

        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// MIME type sent along the encoded image.
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }

    const fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::WebP => ImageFormat::WebP,
        }
    }
}

impl TryFrom<&str> for Format {
    type Error = ImageError;

    fn try_from(extension: &str) -> Result<Self, Self::Error> {
        Self::from_extension(extension)
            .ok_or_else(|| ImageError::UnsupportedFormat(extension.to_owned()))
    }
}

/// Cover-fit resizer.
///
/// Scales the image so that it fills `width`×`height` while keeping its
/// aspect ratio, then crops the overflow evenly on both sides.
///
/// # Returns
///
/// Encoded image buffer, exactly `width`×`height`.
pub fn cover(
    buffer: &[u8],
    width: u32,
    height: u32,
    format: Format,
) -> Result<Vec<u8>, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::MissingWidthOrHeight);
    }

    let img = load_from_memory(buffer)?.resize_to_fill(width, height, Lanczos3);

    // JPEG has no alpha channel and WebP only takes 8-bit RGB(A).
    let img = match format {
        Format::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        Format::WebP => DynamicImage::ImageRgba8(img.to_rgba8()),
        Format::Png => img,
    };

    let mut output: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    img.write_to(&mut output, format.image_format())?;

    Ok(output.into_inner())
}
