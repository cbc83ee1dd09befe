//! Caller facing frame type and its conversion into the RGB8 layout every
//! engine consumes.

use image::{DynamicImage, RgbImage};

use std::path::Path;
use std::sync::Arc;

use crate::error::LprError;

/// Channel order and sample layout of a [`PlateImage`] buffer. All formats
/// use one byte per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    fn rgb_of(self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => [px[0], px[1], px[2]],
            PixelFormat::Bgr8 | PixelFormat::Bgra8 => [px[2], px[1], px[0]],
            PixelFormat::Gray8 => [px[0], px[0], px[0]],
        }
    }
}

/// An immutable pixel buffer handed to the recognizer.
///
/// Rows are `stride` bytes apart; the last row only needs
/// `width * bytes_per_pixel` bytes. Nothing is validated until the image is
/// converted, so a malformed buffer surfaces as an `InvalidImage` error from
/// the recognition call rather than from construction.
#[derive(Debug, Clone)]
pub struct PlateImage {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
}

impl PlateImage {
    /// Tightly packed buffer.
    pub fn new(data: impl Into<Arc<[u8]>>, width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize * format.bytes_per_pixel();
        Self { data: data.into(), width, height, format, stride }
    }

    /// Buffer with padded rows, as handed out by camera frames.
    pub fn with_stride(data: impl Into<Arc<[u8]>>, width: u32, height: u32, format: PixelFormat, stride: usize) -> Self {
        Self { data: data.into(), width, height, format, stride }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, LprError> {
        let img = image::open(path)?;
        Ok(Self::from(img))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert to a packed RGB8 buffer.
    pub fn to_rgb(&self) -> Result<RgbImage, LprError> {
        let (width, height) = (self.width as usize, self.height as usize);
        if width == 0 || height == 0 || self.data.is_empty() {
            return Err(LprError::invalid_image(format!("empty image {}x{}", width, height)));
        }
        let bpp = self.format.bytes_per_pixel();
        let overflow = || LprError::invalid_image(format!("{}x{} image with stride {} overflows", width, height, self.stride));
        let row_bytes = width.checked_mul(bpp).ok_or_else(overflow)?;
        if self.stride < row_bytes {
            return Err(LprError::invalid_image(format!(
                "stride {} is shorter than a row of {} bytes", self.stride, row_bytes
            )));
        }
        let needed = self.stride.checked_mul(height - 1)
            .and_then(|v| v.checked_add(row_bytes))
            .ok_or_else(overflow)?;
        if self.data.len() < needed {
            return Err(LprError::invalid_image(format!(
                "buffer holds {} bytes, {}x{} {:?} needs {}", self.data.len(), width, height, self.format, needed
            )));
        }

        let capacity = width.checked_mul(height).and_then(|v| v.checked_mul(3)).ok_or_else(overflow)?;
        let mut rgb = Vec::with_capacity(capacity);
        for row in self.data.chunks(self.stride).take(height) {
            row[..row_bytes].chunks_exact(bpp).for_each(|px| {
                rgb.extend_from_slice(&self.format.rgb_of(px));
            });
        }
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| LprError::invalid_image("converted buffer does not match dimensions"))
    }
}

impl From<DynamicImage> for PlateImage {
    fn from(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(gray) => {
                let (w, h) = gray.dimensions();
                Self::new(gray.into_raw(), w, h, PixelFormat::Gray8)
            },
            DynamicImage::ImageRgba8(rgba) => {
                let (w, h) = rgba.dimensions();
                Self::new(rgba.into_raw(), w, h, PixelFormat::Rgba8)
            },
            other => Self::from(other.to_rgb8()),
        }
    }
}

impl From<RgbImage> for PlateImage {
    fn from(img: RgbImage) -> Self {
        let (w, h) = img.dimensions();
        Self::new(img.into_raw(), w, h, PixelFormat::Rgb8)
    }
}
