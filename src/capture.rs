//! Timelapse capture: the timed frame loop and the single-job supervisor.
//!
//! A capture job runs on its own background thread: it ensures the frame
//! store exists, opens the camera (with a bounded reopen-retry window, since
//! a preview consumer may have released the device only moments ago), loops
//! until the requested duration elapses, releases the device, and then hands
//! the stored sequence to the external encoder.
//!
//! `JobSupervisor` owns the job state. It admits one job at a time: a start
//! request while a job is running is rejected with `JobAlreadyRunning`
//! instead of racing two loops over the same hardware.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::encode::{self, normalize_output_path, EncoderSettings};
use crate::formats::PixelFormat;
use crate::lease::DeviceLeases;
use crate::source::FrameSource;
use crate::store::FrameStore;
use crate::{Camera, EngineError, Resolution};

/// Bounded retry-with-backoff applied when a device fails to open during
/// the reopen window. `DeviceBusy` (lease held in-process) is never retried.
#[derive(Clone, Copy, Debug)]
pub struct RetrySettings {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Everything one capture job needs.
#[derive(Clone, Debug)]
pub struct CaptureRequest {
    pub camera: Camera,
    /// Total wall-clock capture duration.
    pub duration: Duration,
    /// Sleep between stored frames.
    pub interval: Duration,
    /// Frame rate of the encoded output video.
    pub output_fps: u32,
    /// Output video path; extension is normalized to {mov, mp4, avi}.
    pub output_path: PathBuf,
    /// Frame store directory, created if absent.
    pub frames_dir: PathBuf,
    pub resolution: Option<Resolution>,
    pub pixel_format: Option<PixelFormat>,
}

impl CaptureRequest {
    pub fn validate(&self) -> Result<()> {
        if self.duration.is_zero() {
            return Err(anyhow!("capture duration must be positive"));
        }
        if self.interval.is_zero() {
            return Err(anyhow!("capture interval must be positive"));
        }
        if self.output_fps == 0 {
            return Err(anyhow!("output fps must be at least 1"));
        }
        Ok(())
    }
}

/// What a finished job reports.
#[derive(Clone, Debug)]
pub struct CaptureSummary {
    pub frames_stored: u32,
    pub output_path: PathBuf,
}

/// Open a camera, retrying `DeviceUnavailable` with linear backoff.
///
/// Covers the window where a just-disconnected preview consumer has dropped
/// its lease but the kernel has not finished releasing the node.
pub fn open_with_retry(
    leases: &Arc<DeviceLeases>,
    camera: Camera,
    desired: Option<Resolution>,
    retry: &RetrySettings,
) -> Result<FrameSource> {
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        let lease = leases.acquire(camera)?;
        match FrameSource::open(camera, desired, lease) {
            Ok(source) => return Ok(source),
            Err(e) => {
                let unavailable = matches!(
                    e.downcast_ref::<EngineError>(),
                    Some(EngineError::DeviceUnavailable { .. })
                );
                if !unavailable || attempt == attempts {
                    return Err(e);
                }
                let wait = retry.backoff * attempt;
                log::warn!(
                    "{} failed to open (attempt {}/{}), retrying in {:?}: {}",
                    camera,
                    attempt,
                    attempts,
                    wait,
                    e
                );
                std::thread::sleep(wait);
            }
        }
    }
    unreachable!("retry loop returns on last attempt");
}

/// Run the timed capture loop until `duration` elapses.
///
/// A failed read is logged and skipped without storing a frame or advancing
/// the counter, so the store's numbering stays gapless. Successful frames
/// are followed by one full interval of sleep.
pub(crate) fn run_capture_loop(
    source: &mut FrameSource,
    store: &mut FrameStore,
    duration: Duration,
    interval: Duration,
    jpeg_quality: u8,
) -> Result<u32> {
    let start = Instant::now();
    while start.elapsed() < duration {
        let Some(frame) = source.read_frame()? else {
            log::warn!("{}: frame read failed, skipping", source.camera());
            continue;
        };
        match frame.to_jpeg(jpeg_quality) {
            Ok(jpeg) => {
                store.store_jpeg(&jpeg)?;
            }
            Err(e) => {
                log::warn!("{}: jpeg encode failed, skipping frame: {}", source.camera(), e);
                continue;
            }
        }
        std::thread::sleep(interval);
    }
    Ok(store.frame_count())
}

fn run_job(
    leases: Arc<DeviceLeases>,
    retry: RetrySettings,
    encoder: EncoderSettings,
    jpeg_quality: u8,
    request: CaptureRequest,
) -> Result<CaptureSummary> {
    let output_path = normalize_output_path(&request.output_path);
    let mut store = FrameStore::create(&request.frames_dir)?;

    let mut source = open_with_retry(&leases, request.camera, request.resolution, &retry)?;
    let frames_stored = run_capture_loop(
        &mut source,
        &mut store,
        request.duration,
        request.interval,
        jpeg_quality,
    )?;
    // Release before the encoder runs so the camera frees up immediately.
    source.release();
    log::info!(
        "capture on {} finished: {} frames in {}",
        request.camera,
        frames_stored,
        store.dir().display()
    );

    encode::encode_timelapse(
        &encoder,
        &store.glob_pattern(),
        request.output_fps,
        request.pixel_format,
        &output_path,
    )?;

    Ok(CaptureSummary {
        frames_stored,
        output_path,
    })
}

// -------------------- Job supervisor --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// Owns the single-job state. Observers read it; only the supervisor and the
/// job's exit guard write it.
pub struct JobSupervisor {
    state: Arc<Mutex<JobState>>,
    leases: Arc<DeviceLeases>,
    retry: RetrySettings,
    encoder: EncoderSettings,
    jpeg_quality: u8,
}

impl JobSupervisor {
    pub fn new(
        leases: Arc<DeviceLeases>,
        retry: RetrySettings,
        encoder: EncoderSettings,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(JobState::Idle)),
            leases,
            retry,
            encoder,
            jpeg_quality,
        }
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// Start a capture job on a background thread.
    ///
    /// Rejected with `JobAlreadyRunning` while a job is active. The state
    /// returns to `Idle` on every job exit path, including errors and panics.
    pub fn start(&self, request: CaptureRequest) -> Result<JobHandle> {
        request.validate()?;
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow!("job state lock poisoned"))?;
            if *state == JobState::Running {
                return Err(EngineError::JobAlreadyRunning.into());
            }
            *state = JobState::Running;
        }

        let state = Arc::clone(&self.state);
        let leases = Arc::clone(&self.leases);
        let retry = self.retry;
        let encoder = self.encoder.clone();
        let jpeg_quality = self.jpeg_quality;
        let thread = std::thread::spawn(move || {
            let _guard = IdleGuard(state);
            let result = run_job(leases, retry, encoder, jpeg_quality, request);
            if let Err(e) = &result {
                log::error!("capture job failed: {}", e);
            }
            result
        });

        Ok(JobHandle { thread })
    }
}

/// Resets the supervisor state when the job thread exits, however it exits.
struct IdleGuard(Arc<Mutex<JobState>>);

impl Drop for IdleGuard {
    fn drop(&mut self) {
        // Recover from poisoning so the supervisor never sticks at Running.
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = JobState::Idle;
    }
}

/// Handle to a running capture job.
pub struct JobHandle {
    thread: JoinHandle<Result<CaptureSummary>>,
}

impl JobHandle {
    /// Block until the job finishes and return its outcome.
    pub fn join(self) -> Result<CaptureSummary> {
        self.thread
            .join()
            .map_err(|_| anyhow!("capture job panicked"))?
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
