//! Frame source: exclusive owner of one open camera handle.
//!
//! A `FrameSource` is responsible for:
//! - Opening exactly one camera (lease already acquired by the caller)
//! - Applying the desired resolution and reporting what the hardware chose
//! - Producing successive frames, cropped to the desired resolution when the
//!   hardware hands back padded buffers
//! - Releasing the handle exactly once, on every exit path
//!
//! Two backends exist: the synthetic camera (always compiled; deterministic,
//! used by tests and hardware-free runs) and V4L2 devices behind the
//! `capture-v4l2` feature.

use anyhow::Result;

use crate::frame::Frame;
use crate::lease::DeviceLease;
use crate::{Camera, EngineError, Resolution};

/// Number of synthetic camera slots that open successfully.
pub const SYNTHETIC_SLOTS: u32 = 4;

/// The synthetic slot whose reads alternate success/failure. Used to
/// exercise the skip-and-continue (capture) and terminate (preview) paths.
pub const FLAKY_SYNTHETIC_SLOT: u32 = 3;

pub struct FrameSource {
    camera: Camera,
    backend: Backend,
    desired: Option<Resolution>,
    actual: Resolution,
    lease: Option<DeviceLease>,
    frames_read: u64,
}

enum Backend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "capture-v4l2")]
    Device(v4l2::V4l2Camera),
    Released,
}

impl FrameSource {
    /// Open `camera`, optionally requesting `desired` resolution.
    ///
    /// The lease must belong to the same camera; acquiring it is the
    /// caller's job so that `DeviceBusy` surfaces before any hardware I/O.
    /// Open failure is fatal (`DeviceUnavailable`) and not retried here.
    pub fn open(
        camera: Camera,
        desired: Option<Resolution>,
        lease: DeviceLease,
    ) -> Result<Self> {
        if lease.camera() != camera {
            anyhow::bail!(
                "lease for {} does not match requested {}",
                lease.camera(),
                camera
            );
        }

        let (backend, actual) = match camera {
            Camera::Synthetic(index) => {
                let cam = SyntheticCamera::open(index).map_err(|e| EngineError::DeviceUnavailable {
                    camera,
                    reason: e.to_string(),
                })?;
                let actual = cam.mode();
                (Backend::Synthetic(cam), actual)
            }
            #[cfg(feature = "capture-v4l2")]
            Camera::Index(_) => {
                let cam = v4l2::V4l2Camera::open(&camera.device_path()).map_err(|e| {
                    EngineError::DeviceUnavailable {
                        camera,
                        reason: e.to_string(),
                    }
                })?;
                let actual = cam.actual();
                (Backend::Device(cam), actual)
            }
            #[cfg(not(feature = "capture-v4l2"))]
            Camera::Index(_) => {
                return Err(EngineError::DeviceUnavailable {
                    camera,
                    reason: "v4l2 support not compiled in (enable feature capture-v4l2)".to_string(),
                }
                .into());
            }
        };

        let mut source = Self {
            camera,
            backend,
            desired: None,
            actual,
            lease: Some(lease),
            frames_read: 0,
        };
        if let Some(res) = desired {
            source.apply_resolution(res)?;
        }
        log::info!("opened {} at {}", camera, source.actual);
        Ok(source)
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    /// The resolution the hardware actually applied.
    pub fn actual_resolution(&self) -> Resolution {
        self.actual
    }

    /// Request `desired` and read back what the hardware applied.
    pub fn apply_resolution(&mut self, desired: Resolution) -> Result<Resolution> {
        let actual = match &mut self.backend {
            Backend::Synthetic(cam) => cam.apply_resolution(desired),
            #[cfg(feature = "capture-v4l2")]
            Backend::Device(cam) => cam.apply_resolution(desired)?,
            Backend::Released => anyhow::bail!("frame source already released"),
        };
        self.desired = Some(desired);
        self.actual = actual;
        if actual != desired {
            log::info!(
                "{}: requested {}, hardware applied {}",
                self.camera,
                desired,
                actual
            );
        }
        Ok(actual)
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` is the non-fatal "no frame" signal: the read failed but the
    /// device is still open, and the caller decides whether to retry or stop.
    /// Frames larger than the desired resolution are cropped top-left.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let read = match &mut self.backend {
            Backend::Synthetic(cam) => cam.read(),
            #[cfg(feature = "capture-v4l2")]
            Backend::Device(cam) => cam.read(),
            Backend::Released => anyhow::bail!("frame source already released"),
        };

        let frame = match read {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("frame read failed on {}: {}", self.camera, e);
                return Ok(None);
            }
        };
        self.frames_read += 1;

        // Remove hardware padding: crop, never rescale.
        let frame = match self.desired {
            Some(desired) if frame.exceeds(desired) => frame.crop_to(desired),
            _ => frame,
        };
        Ok(Some(frame))
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Release the device handle and lease. Idempotent.
    pub fn release(&mut self) {
        if matches!(self.backend, Backend::Released) {
            return;
        }
        self.backend = Backend::Released;
        self.lease.take();
        log::info!("released {}", self.camera);
    }

    pub fn is_released(&self) -> bool {
        matches!(self.backend, Backend::Released)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera
// ----------------------------------------------------------------------------

/// Supported modes of the synthetic camera, smallest first. Resolution
/// requests round up to the next mode that fits, mirroring how real hardware
/// snaps to supported sizes.
const SYNTHETIC_MODES: [Resolution; 4] = [
    Resolution::new(320, 240),
    Resolution::new(640, 480),
    Resolution::new(1280, 720),
    Resolution::new(1920, 1080),
];

struct SyntheticCamera {
    index: u32,
    mode: Resolution,
    attempts: u64,
}

impl SyntheticCamera {
    fn open(index: u32) -> Result<Self> {
        if index >= SYNTHETIC_SLOTS {
            anyhow::bail!("no synthetic camera at index {}", index);
        }
        Ok(Self {
            index,
            mode: SYNTHETIC_MODES[1],
            attempts: 0,
        })
    }

    fn mode(&self) -> Resolution {
        self.mode
    }

    fn apply_resolution(&mut self, desired: Resolution) -> Resolution {
        self.mode = SYNTHETIC_MODES
            .iter()
            .find(|m| m.width >= desired.width && m.height >= desired.height)
            .copied()
            .unwrap_or(SYNTHETIC_MODES[SYNTHETIC_MODES.len() - 1]);
        self.mode
    }

    fn read(&mut self) -> Result<Frame> {
        self.attempts += 1;
        if self.index == FLAKY_SYNTHETIC_SLOT && self.attempts % 2 == 0 {
            anyhow::bail!("synthetic read failure (flaky slot)");
        }

        let pixel_count = self.mode.width as usize * self.mode.height as usize * 3;
        let mut data = vec![0u8; pixel_count];
        for (i, px) in data.iter_mut().enumerate() {
            // Mix position, attempt counter, and slot for variation.
            *px = ((i as u64 + self.attempts + self.index as u64) % 256) as u8;
        }
        Frame::from_rgb24(data, self.mode.width, self.mode.height)
    }
}

// ----------------------------------------------------------------------------
// V4L2 camera (feature: capture-v4l2)
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
mod v4l2 {
    use super::*;
    use anyhow::Context;
    use ouroboros::self_referencing;
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;

    #[self_referencing]
    struct V4l2State {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    pub(super) struct V4l2Camera {
        path: String,
        state: Option<V4l2State>,
        actual: Resolution,
    }

    impl V4l2Camera {
        pub(super) fn open(path: &str) -> Result<Self> {
            let device = v4l::Device::with_path(path)
                .with_context(|| format!("open v4l2 device {}", path))?;
            let format = device.format().context("read v4l2 format")?;
            let actual = Resolution::new(format.width, format.height);
            let state = build_state(device)?;
            Ok(Self {
                path: path.to_string(),
                state: Some(state),
                actual,
            })
        }

        pub(super) fn actual(&self) -> Resolution {
            self.actual
        }

        pub(super) fn apply_resolution(&mut self, desired: Resolution) -> Result<Resolution> {
            // The mmap stream pins the open handle; reconfiguring means
            // reopening the node and rebuilding the stream.
            self.state.take();
            let mut device = v4l::Device::with_path(&self.path)
                .with_context(|| format!("reopen v4l2 device {}", self.path))?;
            let mut format = device.format().context("read v4l2 format")?;
            format.width = desired.width;
            format.height = desired.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!("failed to set format on {}: {}", self.path, err);
                    device
                        .format()
                        .context("read v4l2 format after set failure")?
                }
            };
            self.actual = Resolution::new(format.width, format.height);
            self.state = Some(build_state(device)?);
            Ok(self.actual)
        }

        pub(super) fn read(&mut self) -> Result<Frame> {
            let state = self.state.as_mut().context("v4l2 device not connected")?;
            let actual = self.actual;
            let data = state.with_mut(|fields| {
                fields
                    .stream
                    .next()
                    .map(|(buf, _meta)| buf.to_vec())
                    .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))
            })?;

            // Drivers may pad the buffer past the packed RGB size.
            let expected = actual.width as usize * actual.height as usize * 3;
            let mut data = data;
            if data.len() > expected {
                data.truncate(expected);
            }
            Frame::from_rgb24(data, actual.width, actual.height)
        }
    }

    fn build_state(device: v4l::Device) -> Result<V4l2State> {
        V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::DeviceLeases;

    fn open_synthetic(index: u32, desired: Option<Resolution>) -> Result<FrameSource> {
        let leases = DeviceLeases::new();
        let cam = Camera::Synthetic(index);
        FrameSource::open(cam, desired, leases.acquire(cam)?)
    }

    #[test]
    fn source_produces_frames_at_applied_mode() -> Result<()> {
        let mut source = open_synthetic(0, Some(Resolution::new(640, 480)))?;
        assert_eq!(source.actual_resolution(), Resolution::new(640, 480));

        let frame = source.read_frame()?.expect("frame");
        assert_eq!(frame.resolution(), Resolution::new(640, 480));
        Ok(())
    }

    #[test]
    fn oversized_mode_is_cropped_to_desired() -> Result<()> {
        // 800x600 rounds up to the 1280x720 mode; frames crop back down.
        let mut source = open_synthetic(0, Some(Resolution::new(800, 600)))?;
        assert_eq!(source.actual_resolution(), Resolution::new(1280, 720));

        let frame = source.read_frame()?.expect("frame");
        assert_eq!(frame.resolution(), Resolution::new(800, 600));
        Ok(())
    }

    #[test]
    fn open_fails_for_missing_slot() {
        let leases = DeviceLeases::new();
        let cam = Camera::Synthetic(SYNTHETIC_SLOTS + 1);
        let lease = leases.acquire(cam).unwrap();
        let Err(err) = FrameSource::open(cam, None, lease) else {
            panic!("open succeeded for a missing slot");
        };
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn flaky_slot_alternates_reads() -> Result<()> {
        let mut source = open_synthetic(FLAKY_SYNTHETIC_SLOT, None)?;
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_none());
        assert!(source.read_frame()?.is_some());
        Ok(())
    }

    #[test]
    fn release_is_idempotent_and_frees_lease() -> Result<()> {
        let leases = DeviceLeases::new();
        let cam = Camera::Synthetic(1);
        let mut source = FrameSource::open(cam, None, leases.acquire(cam)?)?;
        assert!(leases.is_leased(cam));

        source.release();
        source.release();
        assert!(source.is_released());
        assert!(!leases.is_leased(cam));
        assert!(source.read_frame().is_err());
        Ok(())
    }
}
