//! Collaborator-facing facade.
//!
//! The HTTP layer (or the `lapsed` CLI) talks to the engine exclusively
//! through this surface: enumerate cameras, enumerate resolutions and pixel
//! formats, start a capture job, open a preview stream, and read the
//! job-running flag. The engine owns the lease table and the job supervisor;
//! callers never touch device handles directly.

use anyhow::Result;
use std::sync::Arc;

use crate::capture::{CaptureRequest, JobHandle, JobState, JobSupervisor};
use crate::config::EngineConfig;
use crate::formats::PixelFormatInfo;
use crate::lease::DeviceLeases;
use crate::probe::{self};
use crate::stream::PreviewStream;
use crate::{Camera, Resolution};

pub struct Engine {
    config: EngineConfig,
    leases: Arc<DeviceLeases>,
    supervisor: JobSupervisor,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let leases = DeviceLeases::new();
        let supervisor = JobSupervisor::new(
            Arc::clone(&leases),
            config.retry,
            config.encoder.clone(),
            config.jpeg_quality,
        );
        Self {
            config,
            leases,
            supervisor,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Available camera indices, probed up to the configured maximum.
    pub fn devices(&self) -> Vec<u32> {
        probe::detect_devices(&self.leases, self.config.probe.max_devices)
    }

    /// Distinct supported resolutions of one camera, ascending by area.
    pub fn resolutions(&self, camera: Camera) -> Vec<Resolution> {
        probe::detect_resolutions(&self.leases, camera)
    }

    /// Advertised pixel formats with human-readable labels.
    pub fn pixel_formats(&self, camera: Camera) -> Vec<PixelFormatInfo> {
        probe::detect_pixel_formats(&self.config.probe, camera)
            .into_iter()
            .map(|format| format.info())
            .collect()
    }

    /// Start a background capture job. At most one runs at a time.
    pub fn start_capture(&self, request: CaptureRequest) -> Result<JobHandle> {
        self.supervisor.start(request)
    }

    /// Open an independent preview stream for one consumer.
    pub fn open_preview(
        &self,
        camera: Camera,
        resolution: Option<Resolution>,
    ) -> Result<PreviewStream> {
        PreviewStream::open(&self.leases, camera, resolution, self.config.jpeg_quality)
    }

    pub fn job_state(&self) -> JobState {
        self.supervisor.state()
    }

    pub fn job_running(&self) -> bool {
        self.supervisor.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::PixelFormat;

    #[test]
    fn pixel_formats_carry_labels_and_default() {
        let engine = Engine::with_defaults();
        let formats = engine.pixel_formats(Camera::Synthetic(0));
        assert!(formats
            .iter()
            .any(|info| info.value == PixelFormat::Yuv420p));
        assert!(formats.iter().all(|info| !info.label.is_empty()));
    }

    #[test]
    fn resolutions_come_back_sorted() {
        let engine = Engine::with_defaults();
        let resolutions = engine.resolutions(Camera::Synthetic(1));
        assert!(!resolutions.is_empty());
        for pair in resolutions.windows(2) {
            assert!(pair[0].area() < pair[1].area());
        }
    }

    #[test]
    fn job_state_starts_idle() {
        let engine = Engine::with_defaults();
        assert_eq!(engine.job_state(), JobState::Idle);
        assert!(!engine.job_running());
    }
}
