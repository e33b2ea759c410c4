//! Raw frame to image conversion.
//!
//! A [`VideoSession`](crate::VideoSession) hands back a [`RawFrame`]: one
//! packed plane of 8-bit pixels with an arbitrary row stride. A
//! [`FrameConverter`] turns that into an [`image::DynamicImage`] the caller
//! can display or save. [`ImageConverter`] is the default converter and can
//! optionally shrink frames to thumbnail size.

use image::{DynamicImage, RgbImage, RgbaImage, imageops::FilterType};

use crate::utilities;

/// Byte layout of a single packed pixel in a [`RawFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelLayout {
    /// 8-bit blue, green, red, alpha. This is the default.
    #[default]
    Bgra8,
    /// 8-bit red, green, blue, alpha.
    Rgba8,
    /// 8-bit red, green, blue.
    Rgb8,
}

impl PixelLayout {
    /// Number of bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Bgra8 | PixelLayout::Rgba8 => 4,
            PixelLayout::Rgb8 => 3,
        }
    }
}

/// A decoded video frame as produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes from the start of one row to the start of the next.
    pub stride: usize,
    /// Pixel layout of `data`.
    pub layout: PixelLayout,
    /// Pixel bytes, `stride * height` or slightly fewer for the last row.
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Build a frame whose rows have no padding.
    pub fn packed(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width as usize * layout.bytes_per_pixel(),
            layout,
            data,
        }
    }
}

/// Converts raw decoder frames into images.
///
/// Returning `None` reports
/// [`ThumbnailError::ImageConversionFailed`](crate::ThumbnailError::ImageConversionFailed)
/// for that timestamp.
pub trait FrameConverter: Send + Sync {
    /// Convert `frame` to an image, or `None` if it cannot be represented.
    fn convert(&self, frame: &RawFrame) -> Option<DynamicImage>;
}

impl<F> FrameConverter for F
where
    F: Fn(&RawFrame) -> Option<DynamicImage> + Send + Sync,
{
    fn convert(&self, frame: &RawFrame) -> Option<DynamicImage> {
        self(frame)
    }
}

/// Default [`FrameConverter`].
///
/// Strips row padding, reorders BGRA into RGBA, and optionally scales the
/// result so that its longest edge fits within `max_dimension`.
///
/// # Example
///
/// ```
/// use thumbq::{FrameConverter, ImageConverter, PixelLayout, RawFrame};
///
/// let frame = RawFrame::packed(4, 2, PixelLayout::Rgb8, vec![0; 4 * 2 * 3]);
/// let converter = ImageConverter::new().with_max_dimension(2);
/// let image = converter.convert(&frame).unwrap();
/// assert_eq!((image.width(), image.height()), (2, 1));
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ImageConverter {
    /// Longest edge of the output in pixels. `None` keeps the source size.
    pub max_dimension: Option<u32>,
}

impl ImageConverter {
    /// Create a converter that keeps the source resolution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scale output so its longest edge is at most `max_dimension` pixels.
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = Some(max_dimension.max(1));
        self
    }
}

impl FrameConverter for ImageConverter {
    fn convert(&self, frame: &RawFrame) -> Option<DynamicImage> {
        let image = frame_to_image(frame)?;
        match self.max_dimension {
            Some(max_dimension) => {
                let (width, height) = fit_dimensions(image.width(), image.height(), max_dimension);
                if (width, height) == (image.width(), image.height()) {
                    Some(image)
                } else {
                    Some(image.resize_exact(width, height, FilterType::Triangle))
                }
            }
            None => Some(image),
        }
    }
}

fn frame_to_image(frame: &RawFrame) -> Option<DynamicImage> {
    if frame.width == 0 || frame.height == 0 {
        return None;
    }

    let row_bytes = frame.width as usize * frame.layout.bytes_per_pixel();
    let mut buffer =
        utilities::strip_stride(&frame.data, frame.stride, row_bytes, frame.height as usize)?;

    match frame.layout {
        PixelLayout::Bgra8 => {
            for pixel in buffer.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
            RgbaImage::from_raw(frame.width, frame.height, buffer).map(DynamicImage::ImageRgba8)
        }
        PixelLayout::Rgba8 => {
            RgbaImage::from_raw(frame.width, frame.height, buffer).map(DynamicImage::ImageRgba8)
        }
        PixelLayout::Rgb8 => {
            RgbImage::from_raw(frame.width, frame.height, buffer).map(DynamicImage::ImageRgb8)
        }
    }
}

/// Compute dimensions that fit within `max_dimension` while preserving the
/// aspect ratio. Never upscales.
fn fit_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    if width >= height {
        let scaled = (height as f64 * max_dimension as f64 / width as f64).round() as u32;
        (max_dimension, scaled.max(1))
    } else {
        let scaled = (width as f64 * max_dimension as f64 / height as f64).round() as u32;
        (scaled.max(1), max_dimension)
    }
}
