use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use lapse_engine::{
    Camera, CaptureRequest, Engine, EngineConfig, EngineError, JobState, Resolution,
};

/// Engine wired to a no-op encoder so jobs finish without ffmpeg installed.
fn stub_engine(encoder_program: &str) -> Engine {
    let mut config = EngineConfig::default();
    config.encoder.program = encoder_program.to_string();
    Engine::new(config)
}

fn request(camera: Camera, tmp: &TempDir, duration_ms: u64) -> CaptureRequest {
    CaptureRequest {
        camera,
        duration: Duration::from_millis(duration_ms),
        interval: Duration::from_millis(120),
        output_fps: 10,
        output_path: tmp.path().join("out.mp4"),
        frames_dir: tmp.path().join("frames"),
        resolution: Some(Resolution::new(320, 240)),
        pixel_format: None,
    }
}

#[test]
fn capture_job_end_to_end() {
    let tmp = TempDir::new().expect("tempdir");
    let engine = stub_engine("true");

    let handle = engine
        .start_capture(request(Camera::Synthetic(0), &tmp, 400))
        .expect("start job");
    let summary = handle.join().expect("job result");

    assert!(summary.frames_stored >= 1);
    assert_eq!(summary.output_path, tmp.path().join("out.mp4"));

    // Frame files exist and the numbering is gapless from zero.
    let frames_dir = tmp.path().join("frames");
    for index in 0..summary.frames_stored {
        let name = format!("frame_{:05}.jpg", index);
        assert!(frames_dir.join(&name).is_file(), "missing {}", name);
    }
    let extra = format!("frame_{:05}.jpg", summary.frames_stored);
    assert!(!frames_dir.join(extra).exists());

    assert_eq!(engine.job_state(), JobState::Idle);
}

#[test]
fn concurrent_start_is_rejected_then_allowed_again() {
    let tmp = TempDir::new().expect("tempdir");
    let engine = stub_engine("true");

    let handle = engine
        .start_capture(request(Camera::Synthetic(1), &tmp, 800))
        .expect("start first job");
    assert!(engine.job_running());

    let Err(err) = engine.start_capture(request(Camera::Synthetic(2), &tmp, 200)) else {
        panic!("second start was admitted while a job was running");
    };
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::JobAlreadyRunning)
    ));

    handle.join().expect("first job result");
    assert_eq!(engine.job_state(), JobState::Idle);

    let tmp2 = TempDir::new().expect("tempdir");
    let handle = engine
        .start_capture(request(Camera::Synthetic(2), &tmp2, 200))
        .expect("start after idle");
    handle.join().expect("second job result");
}

#[test]
fn capture_on_previewed_camera_reports_busy() {
    let tmp = TempDir::new().expect("tempdir");
    let engine = stub_engine("true");
    let camera = Camera::Synthetic(2);

    let _preview = engine.open_preview(camera, None).expect("open preview");

    let handle = engine
        .start_capture(request(camera, &tmp, 200))
        .expect("start job");
    let err = handle.join().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DeviceBusy { .. })
    ));
    assert_eq!(engine.job_state(), JobState::Idle);
}

#[test]
fn encoder_failure_surfaces_through_join() {
    let tmp = TempDir::new().expect("tempdir");
    let engine = stub_engine("false");

    let handle = engine
        .start_capture(request(Camera::Synthetic(0), &tmp, 250))
        .expect("start job");
    let err = handle.join().unwrap_err();
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::EncodeFailed { status, .. }) => {
            assert_eq!(*status, Some(1));
        }
        other => panic!("expected EncodeFailed, got {:?}", other),
    }
    // Frames were still stored before the encoder ran.
    assert!(tmp.path().join("frames").join("frame_00000.jpg").is_file());
    assert_eq!(engine.job_state(), JobState::Idle);
}

#[test]
fn unknown_output_extension_is_normalized() {
    let tmp = TempDir::new().expect("tempdir");
    let engine = stub_engine("true");

    let mut req = request(Camera::Synthetic(1), &tmp, 200);
    req.output_path = tmp.path().join("clip.gif");
    let handle = engine.start_capture(req).expect("start job");
    let summary = handle.join().expect("job result");

    assert_eq!(
        summary.output_path,
        PathBuf::from(tmp.path().join("clip.gif.mp4"))
    );
}

#[test]
fn unavailable_camera_fails_the_job() {
    let tmp = TempDir::new().expect("tempdir");
    let engine = stub_engine("true");

    let handle = engine
        .start_capture(request(Camera::Synthetic(42), &tmp, 200))
        .expect("start job");
    let err = handle.join().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DeviceUnavailable { .. })
    ));
}
