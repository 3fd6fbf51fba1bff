//! Plate crop data structure

use image::{DynamicImage, RgbImage};

/// A rectangular image region believed to contain a license plate
#[derive(Debug, Clone)]
pub struct PlateCrop {
    image: RgbImage,
}

impl PlateCrop {
    /// Wrap an RGB image
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Convert any decoded image into a crop
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::new(image.to_rgb8())
    }

    /// Build a crop from raw RGB bytes; `None` when the buffer is too small
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    /// Cut a region out of a frame, clamped to the frame bounds
    pub fn from_region(frame: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> Self {
        let x = x.min(frame.width());
        let y = y.min(frame.height());
        let width = width.min(frame.width() - x);
        let height = height.min(frame.height() - y);
        Self::new(image::imageops::crop_imm(frame, x, y, width, height).to_image())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Get crop dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Zero width or height
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}
