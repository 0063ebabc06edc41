//! Timelapse capture engine.
//!
//! This crate implements the core of a webcam timelapse recorder:
//!
//! - `probe`: camera/resolution/pixel-format discovery
//! - `source`: exclusive ownership of one open camera handle, frame reads,
//!   crop normalization
//! - `capture`: the timed capture loop and the single-job supervisor
//! - `stream`: the live multipart-JPEG preview generator
//! - `encode`: handoff of a stored frame sequence to the external encoder
//! - `engine`: the facade consumed by collaborator layers (HTTP, CLI)
//!
//! # Resource discipline
//!
//! A physical camera is a contended resource. Every open goes through a
//! `DeviceLease` first; a second open of a leased camera fails with
//! `DeviceBusy` instead of racing the hardware. A handle is released exactly
//! once on every exit path (normal completion, error, consumer disconnect).
//!
//! At most one capture job runs at a time, enforced by `JobSupervisor`.
//! Preview streams are independent: each consumer gets its own source.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub mod capture;
pub mod config;
pub mod encode;
pub mod engine;
pub mod formats;
pub mod frame;
pub mod lease;
pub mod probe;
pub mod source;
pub mod store;
pub mod stream;

pub use capture::{
    CaptureRequest, CaptureSummary, JobHandle, JobState, JobSupervisor, RetrySettings,
};
pub use config::EngineConfig;
pub use encode::{normalize_output_path, EncoderSettings};
pub use engine::Engine;
pub use formats::{PixelFormat, PixelFormatInfo};
pub use frame::Frame;
pub use lease::{DeviceLease, DeviceLeases};
pub use probe::{detect_devices, detect_pixel_formats, detect_resolutions, ProbeSettings};
pub use source::FrameSource;
pub use store::FrameStore;
pub use stream::{CancelToken, PreviewStream, MULTIPART_CONTENT_TYPE};

// -------------------- Cameras --------------------

/// A camera addressed by integer index.
///
/// `Index` maps to a real device node (`/dev/video{n}`, feature
/// `capture-v4l2`). `Synthetic` is the deterministic in-process camera used
/// by tests and hardware-free deployments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Camera {
    Index(u32),
    Synthetic(u32),
}

impl Camera {
    pub fn index(&self) -> u32 {
        match self {
            Camera::Index(n) | Camera::Synthetic(n) => *n,
        }
    }

    /// Device node path for real cameras.
    pub fn device_path(&self) -> String {
        match self {
            Camera::Index(n) => format!("/dev/video{}", n),
            Camera::Synthetic(n) => format!("synth:{}", n),
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Camera::Index(n) => write!(f, "camera {}", n),
            Camera::Synthetic(n) => write!(f, "synthetic camera {}", n),
        }
    }
}

impl FromStr for Camera {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("synth:") {
            let n: u32 = rest
                .parse()
                .map_err(|_| anyhow!("invalid synthetic camera index '{}'", rest))?;
            return Ok(Camera::Synthetic(n));
        }
        let n: u32 = s
            .parse()
            .map_err(|_| anyhow!("invalid camera index '{}'", s))?;
        Ok(Camera::Index(n))
    }
}

// -------------------- Resolutions --------------------

/// A width/height pair in pixels.
///
/// A *desired* resolution is what the caller asked for; the *actual*
/// resolution is what the hardware reports after the request is applied.
/// The two legitimately differ: hardware rounds to supported modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // Compile once for hot paths.
        static RESOLUTION_RE: OnceLock<regex::Regex> = OnceLock::new();
        let re =
            RESOLUTION_RE.get_or_init(|| regex::Regex::new(r"^(\d{1,5})x(\d{1,5})$").unwrap());

        let caps = re
            .captures(s.trim())
            .ok_or_else(|| anyhow!("resolution must be WIDTHxHEIGHT, got '{}'", s))?;
        let width: u32 = caps[1].parse()?;
        let height: u32 = caps[2].parse()?;
        if width == 0 || height == 0 {
            return Err(anyhow!("resolution dimensions must be non-zero"));
        }
        Ok(Resolution { width, height })
    }
}

// -------------------- Error taxonomy --------------------

/// Fatal engine conditions surfaced to callers.
///
/// Transient conditions are not here on purpose: a failed frame read is
/// `Ok(None)` from `FrameSource::read_frame` (the caller decides whether to
/// skip or stop), and probe-tool failures collapse into the default format
/// list without surfacing at all.
#[derive(Debug)]
pub enum EngineError {
    /// The camera did not open (missing, unplugged, or held outside the
    /// process). Not retried beyond the configured reopen window.
    DeviceUnavailable { camera: Camera, reason: String },
    /// The camera's exclusive lease is already held in-process.
    DeviceBusy { camera: Camera },
    /// A capture job is already running; the supervisor admits one at a time.
    JobAlreadyRunning,
    /// The external encoder exited non-zero or could not be invoked.
    EncodeFailed { status: Option<i32>, stderr: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::DeviceUnavailable { camera, reason } => {
                write!(f, "{} unavailable: {}", camera, reason)
            }
            EngineError::DeviceBusy { camera } => {
                write!(f, "{} is busy (exclusive lease held)", camera)
            }
            EngineError::JobAlreadyRunning => {
                write!(f, "a capture job is already running")
            }
            EngineError::EncodeFailed { status, stderr } => match status {
                Some(code) => write!(f, "encoder exited with status {}: {}", code, stderr.trim()),
                None => write!(f, "encoder invocation failed: {}", stderr.trim()),
            },
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_parses_index_and_synthetic() -> Result<()> {
        assert_eq!("2".parse::<Camera>()?, Camera::Index(2));
        assert_eq!("synth:1".parse::<Camera>()?, Camera::Synthetic(1));
        assert!("synth:x".parse::<Camera>().is_err());
        assert!("video0".parse::<Camera>().is_err());
        Ok(())
    }

    #[test]
    fn resolution_parses_and_rejects() -> Result<()> {
        assert_eq!("640x480".parse::<Resolution>()?, Resolution::new(640, 480));
        assert_eq!(
            " 1920x1080 ".parse::<Resolution>()?,
            Resolution::new(1920, 1080)
        );
        assert!("640".parse::<Resolution>().is_err());
        assert!("0x480".parse::<Resolution>().is_err());
        assert!("640x".parse::<Resolution>().is_err());
        Ok(())
    }

    #[test]
    fn resolution_area_orders_by_pixels() {
        assert!(Resolution::new(320, 240).area() < Resolution::new(640, 480).area());
        assert_eq!(Resolution::new(1920, 1080).area(), 2_073_600);
    }
}
