//! Captured frame container.
//!
//! Frames are tightly-packed RGB24. Some cameras hand back buffers larger
//! than the requested mode (extra padding rows/columns); `crop_to` removes
//! that padding by keeping the top-left region. Cropping never rescales.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::Resolution;

const BYTES_PER_PIXEL: usize = 3;

/// One captured image in RGB24 layout.
#[derive(Clone, Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Build a frame from a packed RGB24 buffer. Length must match.
    pub(crate) fn from_rgb24(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            anyhow::bail!(
                "rgb24 buffer length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            );
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Does this frame exceed `desired` in either axis?
    pub fn exceeds(&self, desired: Resolution) -> bool {
        self.width > desired.width || self.height > desired.height
    }

    /// Crop to at most `desired`, keeping the top-left region.
    ///
    /// Axes already within bounds are left alone, so a 640x490 frame cropped
    /// to 640x480 comes out exactly 640x480.
    pub fn crop_to(&self, desired: Resolution) -> Frame {
        let new_w = self.width.min(desired.width);
        let new_h = self.height.min(desired.height);
        if new_w == self.width && new_h == self.height {
            return self.clone();
        }

        let src_stride = self.width as usize * BYTES_PER_PIXEL;
        let dst_stride = new_w as usize * BYTES_PER_PIXEL;
        let mut data = Vec::with_capacity(dst_stride * new_h as usize);
        for row in 0..new_h as usize {
            let start = row * src_stride;
            data.extend_from_slice(&self.data[start..start + dst_stride]);
        }

        Frame {
            width: new_w,
            height: new_h,
            data,
        }
    }

    /// Encode as JPEG at the given quality (1..=100).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .context("encode frame as jpeg")?;
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gradient frame where each pixel encodes its own coordinates.
    fn coordinate_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        Frame::from_rgb24(data, width, height).unwrap()
    }

    #[test]
    fn crop_removes_padding_rows_from_bottom() {
        // Camera reported 640x490 for a 640x480 request: 10 padding rows.
        let frame = coordinate_frame(640, 490);
        let cropped = frame.crop_to(Resolution::new(640, 480));

        assert_eq!(cropped.width(), 640);
        assert_eq!(cropped.height(), 480);
        // Top-left pixels are untouched.
        assert_eq!(cropped.pixel(0, 0), frame.pixel(0, 0));
        assert_eq!(cropped.pixel(639, 479), frame.pixel(639, 479));
    }

    #[test]
    fn crop_handles_both_axes() {
        let frame = coordinate_frame(16, 12);
        let cropped = frame.crop_to(Resolution::new(10, 8));
        assert_eq!(cropped.resolution(), Resolution::new(10, 8));
        assert_eq!(cropped.pixel(9, 7), frame.pixel(9, 7));
    }

    #[test]
    fn crop_is_noop_when_within_bounds() {
        let frame = coordinate_frame(320, 240);
        let cropped = frame.crop_to(Resolution::new(640, 480));
        assert_eq!(cropped.resolution(), frame.resolution());
        assert!(!frame.exceeds(Resolution::new(640, 480)));
    }

    #[test]
    fn jpeg_encoding_yields_jfif_bytes() -> Result<()> {
        let frame = coordinate_frame(32, 32);
        let jpeg = frame.to_jpeg(85)?;
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn from_rgb24_rejects_bad_lengths() {
        assert!(Frame::from_rgb24(vec![0u8; 10], 2, 2).is_err());
    }
}
