use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::debug;

use crate::error::{PipelineError, Result};

pub const DISPLAY_WIDTH: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Jpeg,
    Png,
    Bmp,
    Gif,
}

impl UploadFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
        }
    }

    fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Bmp => Some(Self::Bmp),
            ImageFormat::Gif => Some(Self::Gif),
            _ => None,
        }
    }
}

/// Identifies the upload from its magic bytes; the declared name is ignored.
pub fn sniff_upload_format(bytes: &[u8]) -> Result<UploadFormat> {
    let format = image::guess_format(bytes).map_err(|_| PipelineError::UnsupportedFormat)?;
    UploadFormat::from_image_format(format).ok_or(PipelineError::UnsupportedFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Output pixel budget: 600 px wide by up to 40 000 px tall.
pub const DEFAULT_MAX_OUTPUT_PIXELS: u64 = 24_000_000;

/// Height that keeps the aspect ratio once the width becomes `target_width`.
/// `None` when the result does not fit in a `u32`.
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> Option<u32> {
    if width == 0 || height == 0 {
        return Some(1);
    }
    let aspect_ratio = f64::from(width) / f64::from(height);
    let scaled = (f64::from(target_width) / aspect_ratio).round();
    if scaled > f64::from(u32::MAX) {
        return None;
    }
    Some((scaled as u32).max(1))
}

pub fn resize_for_display(image: &DynamicImage, max_pixels: u64) -> Result<DynamicImage> {
    let (width, height) = (image.width(), image.height());
    let too_large = || PipelineError::ImageTooLarge {
        width,
        height,
        max_pixels,
    };
    let target_height = scaled_height(width, height, DISPLAY_WIDTH).ok_or_else(too_large)?;
    let pixels = u64::from(DISPLAY_WIDTH)
        .checked_mul(u64::from(target_height))
        .filter(|pixels| *pixels <= max_pixels)
        .ok_or_else(too_large)?;
    debug!(pixels, target_height, "resizing for display");
    Ok(image.resize_exact(DISPLAY_WIDTH, target_height, FilterType::CatmullRom))
}

/// Decodes `input`, scales it to [`DISPLAY_WIDTH`] and writes a PNG to
/// `output`, replacing whatever is there. Images whose scaled size would
/// exceed `max_pixels` are rejected before any resize buffer is allocated.
pub fn preprocess_image(
    input: &Path,
    output: &Path,
    max_pixels: u64,
) -> Result<PreprocessedImage> {
    let reader = ImageReader::open(input)
        .map_err(|err| PipelineError::io(format!("failed to open {}", input.display()), err))?
        .with_guessed_format()
        .map_err(|err| PipelineError::io(format!("failed to read {}", input.display()), err))?;
    let decoded = reader
        .decode()
        .map_err(|source| PipelineError::ImageDecode {
            path: input.to_path_buf(),
            source,
        })?;

    let resized = resize_for_display(&decoded, max_pixels)?;
    resized
        .save_with_format(output, ImageFormat::Png)
        .map_err(|err| {
            PipelineError::io(
                format!("failed to write {}", output.display()),
                std::io::Error::other(err),
            )
        })?;
    debug!(
        source_width = decoded.width(),
        source_height = decoded.height(),
        width = resized.width(),
        height = resized.height(),
        output = %output.display(),
        "preprocessed image"
    );

    Ok(PreprocessedImage {
        path: output.to_path_buf(),
        width: resized.width(),
        height: resized.height(),
    })
}
