//! The fixed symbolic pixel-format set.
//!
//! Format tags follow the encoder's naming (`-pix_fmt` values), not V4L2
//! fourccs. Probing maps whatever the device-listing tool reports onto this
//! closed set; anything unrecognized is dropped.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    Yuyv422,
    Mjpeg,
    Rgb24,
    Bgr24,
    Nv12,
    Yuv422p,
    Yuv444p,
    Gray,
}

impl PixelFormat {
    /// All known formats, in the order they are offered to callers.
    pub const ALL: [PixelFormat; 9] = [
        PixelFormat::Yuv420p,
        PixelFormat::Yuyv422,
        PixelFormat::Mjpeg,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Nv12,
        PixelFormat::Yuv422p,
        PixelFormat::Yuv444p,
        PixelFormat::Gray,
    ];

    /// The always-safe default handed to the encoder when nothing is chosen.
    pub const DEFAULT: PixelFormat = PixelFormat::Yuv420p;

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuyv422 => "yuyv422",
            PixelFormat::Mjpeg => "mjpeg",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Gray => "gray",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "YUV 4:2:0 (most compatible)",
            PixelFormat::Yuyv422 => "YUYV 4:2:2",
            PixelFormat::Mjpeg => "Motion JPEG",
            PixelFormat::Rgb24 => "RGB 24-bit",
            PixelFormat::Bgr24 => "BGR 24-bit",
            PixelFormat::Nv12 => "NV12 (YUV 4:2:0)",
            PixelFormat::Yuv422p => "YUV 4:2:2 planar",
            PixelFormat::Yuv444p => "YUV 4:4:4 planar",
            PixelFormat::Gray => "Grayscale",
        }
    }

    pub fn info(&self) -> PixelFormatInfo {
        PixelFormatInfo {
            value: *self,
            label: self.description().to_string(),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        PixelFormat::ALL
            .iter()
            .find(|fmt| fmt.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow!("unknown pixel format '{}'", s))
    }
}

/// Value/label pair for selection UIs. Serialized as-is by the collaborator
/// layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PixelFormatInfo {
    pub value: PixelFormat,
    pub label: String,
}

/// Tokens the device-listing tool reports, mapped onto the symbolic set.
/// Matching is substring-based over the lowercased tool output; `mjpg` and
/// `mjpeg` both occur in the wild.
pub(crate) const PROBE_TOKEN_MAP: &[(&str, PixelFormat)] = &[
    ("yuyv", PixelFormat::Yuyv422),
    ("mjpeg", PixelFormat::Mjpeg),
    ("mjpg", PixelFormat::Mjpeg),
    ("yuv420", PixelFormat::Yuv420p),
    ("nv12", PixelFormat::Nv12),
    ("rgb", PixelFormat::Rgb24),
    ("bgr", PixelFormat::Bgr24),
    ("gray", PixelFormat::Gray),
    ("grey", PixelFormat::Gray),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_round_trip_through_strings() -> Result<()> {
        for fmt in PixelFormat::ALL {
            assert_eq!(fmt.as_str().parse::<PixelFormat>()?, fmt);
        }
        assert!("yuv9000".parse::<PixelFormat>().is_err());
        Ok(())
    }

    #[test]
    fn serde_uses_encoder_names() -> Result<()> {
        let json = serde_json::to_string(&PixelFormat::Yuv420p)?;
        assert_eq!(json, "\"yuv420p\"");
        let back: PixelFormat = serde_json::from_str("\"mjpeg\"")?;
        assert_eq!(back, PixelFormat::Mjpeg);
        Ok(())
    }

    #[test]
    fn info_carries_description() {
        let info = PixelFormat::Gray.info();
        assert_eq!(info.label, "Grayscale");
    }
}
