#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused_imports,
    unused_mut,
    missing_docs,
    missing_debug_implementations
)]

//! # image_processor
//!
//! cover-fit resizer for profile photos.
//! the output is encoded back into the format of the upload (JPEG, PNG or
//! WebP), so the stored file keeps its original extension.
//!
//! # Resize a photo
//!
//! ```no_run
//! use image_processor::{Format, cover};
//!
//! let buffer = std::fs::read("photo.jpg").unwrap();
//! let square = cover(&buffer, 300, 300, Format::Jpeg).unwrap();
//! std::fs::write("square.jpg", square).unwrap();
//! ```

/// Resize image with a crop-to-fill strategy.
pub mod resizer;

pub use resizer::{Format, cover};

/// Error type.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Error from `image` crate, while decoding or encoding.
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// Extension does not map to a supported encoder.
    #[error("unsupported image format `{0}`")]
    UnsupportedFormat(String),
    /// Output must have a surface.
    #[error("width and height must be greater than zero")]
    MissingWidthOrHeight,
}
