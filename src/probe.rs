//! Camera capability probing.
//!
//! Three discovery operations back the collaborator-facing query surface:
//! available device indices, resolutions a device actually supports, and the
//! pixel formats it advertises. Probing is best-effort throughout: a camera
//! that will not open is silently skipped, and a missing or failing listing
//! tool degrades to a fixed default format set. Probe failures never surface
//! as errors.

use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::formats::{PixelFormat, PROBE_TOKEN_MAP};
use crate::lease::DeviceLeases;
use crate::source::FrameSource;
use crate::{Camera, Resolution};

/// Candidate resolutions requested during detection, smallest first.
pub const CANDIDATE_RESOLUTIONS: [Resolution; 9] = [
    Resolution::new(320, 240),   // QVGA
    Resolution::new(640, 480),   // VGA
    Resolution::new(800, 600),   // SVGA
    Resolution::new(1024, 768),  // XGA
    Resolution::new(1280, 720),  // HD 720p
    Resolution::new(1280, 1024), // SXGA
    Resolution::new(1920, 1080), // Full HD 1080p
    Resolution::new(2560, 1440), // QHD
    Resolution::new(3840, 2160), // 4K UHD
];

/// Formats assumed when the listing tool reports nothing usable.
const FALLBACK_FORMATS: [PixelFormat; 3] = [
    PixelFormat::Yuv420p,
    PixelFormat::Yuyv422,
    PixelFormat::Mjpeg,
];

const DEFAULT_PROBE_TOOL: &str = "v4l2-ctl";
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_DEVICES: u32 = 10;

/// Settings for the external device-listing tool and device enumeration.
#[derive(Clone, Debug)]
pub struct ProbeSettings {
    /// Listing tool invoked as `<tool> --device /dev/videoN --list-formats-ext`.
    pub tool: String,
    /// Hard deadline for one tool invocation.
    pub timeout: Duration,
    /// Upper bound of the device-index scan.
    pub max_devices: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            tool: DEFAULT_PROBE_TOOL.to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            max_devices: DEFAULT_MAX_DEVICES,
        }
    }
}

// -------------------- Devices --------------------

/// Probe indices `0..max_index` and return those whose open succeeds.
///
/// Each probed camera is opened and released immediately. Unavailable
/// indices (including busy ones) are skipped without error.
pub fn detect_devices(leases: &Arc<DeviceLeases>, max_index: u32) -> Vec<u32> {
    let cameras: Vec<Camera> = (0..max_index).map(Camera::Index).collect();
    detect_devices_among(leases, &cameras)
        .into_iter()
        .map(|cam| cam.index())
        .collect()
}

/// Probe an explicit camera list. Exposed so synthetic cameras can be
/// enumerated the same way real ones are.
pub fn detect_devices_among(leases: &Arc<DeviceLeases>, cameras: &[Camera]) -> Vec<Camera> {
    let mut available = Vec::new();
    for &camera in cameras {
        let Ok(lease) = leases.acquire(camera) else {
            continue;
        };
        match FrameSource::open(camera, None, lease) {
            Ok(mut source) => {
                source.release();
                available.push(camera);
            }
            Err(e) => log::debug!("probe: {} not available: {}", camera, e),
        }
    }
    available
}

// -------------------- Resolutions --------------------

/// Request each candidate resolution and collect the distinct resolutions the
/// hardware actually applied, sorted ascending by pixel area.
///
/// Returns an empty list if the camera cannot be opened; never errors.
pub fn detect_resolutions(leases: &Arc<DeviceLeases>, camera: Camera) -> Vec<Resolution> {
    let Ok(lease) = leases.acquire(camera) else {
        return Vec::new();
    };
    let mut source = match FrameSource::open(camera, None, lease) {
        Ok(source) => source,
        Err(e) => {
            log::debug!("probe: {} not available for resolutions: {}", camera, e);
            return Vec::new();
        }
    };

    let mut found: Vec<Resolution> = Vec::new();
    for candidate in CANDIDATE_RESOLUTIONS {
        match source.apply_resolution(candidate) {
            Ok(actual) => {
                if !found.contains(&actual) {
                    found.push(actual);
                }
            }
            Err(e) => log::debug!("probe: {} rejected {}: {}", camera, candidate, e),
        }
    }
    source.release();

    found.sort_by_key(Resolution::area);
    found
}

// -------------------- Pixel formats --------------------

/// Detect the pixel formats a camera advertises.
///
/// Queries the OS-level listing tool with a bounded timeout and maps its
/// report onto the symbolic format set, ordered by first occurrence in the
/// report. Falls back to {yuv420p, yuyv422, mjpeg} when the tool is missing,
/// fails, or times out. The result always contains yuv420p.
pub fn detect_pixel_formats(settings: &ProbeSettings, camera: Camera) -> Vec<PixelFormat> {
    let listed = match camera {
        Camera::Index(_) => run_listing_tool(settings, &camera.device_path())
            .map(|output| formats_from_listing(&output))
            .unwrap_or_else(|e| {
                log::debug!("probe: format listing for {} failed: {}", camera, e);
                Vec::new()
            }),
        // No OS listing exists for the synthetic camera.
        Camera::Synthetic(_) => Vec::new(),
    };
    ensure_yuv420p(listed)
}

/// Map tool output tokens onto the symbolic set, each format at most once,
/// ordered by first occurrence in the report.
fn formats_from_listing(output: &str) -> Vec<PixelFormat> {
    let haystack = output.to_lowercase();
    let mut hits: Vec<(usize, PixelFormat)> = Vec::new();
    for (token, format) in PROBE_TOKEN_MAP {
        if let Some(pos) = haystack.find(token) {
            if !hits.iter().any(|(_, f)| f == format) {
                hits.push((pos, *format));
            }
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, format)| format).collect()
}

fn ensure_yuv420p(mut formats: Vec<PixelFormat>) -> Vec<PixelFormat> {
    if formats.is_empty() {
        return FALLBACK_FORMATS.to_vec();
    }
    if !formats.contains(&PixelFormat::Yuv420p) {
        formats.insert(0, PixelFormat::Yuv420p);
    }
    formats
}

/// Run the listing tool with a hard deadline, returning captured stdout.
fn run_listing_tool(settings: &ProbeSettings, device_path: &str) -> Result<String> {
    let mut child = Command::new(&settings.tool)
        .args(["--device", device_path, "--list-formats-ext"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn {}", settings.tool))?;

    // Drain stdout while the tool runs; a report larger than the pipe buffer
    // would otherwise stall the child until the deadline kills it.
    let mut stdout = child.stdout.take().context("capture listing tool stdout")?;
    let reader = std::thread::spawn(move || {
        let mut output = String::new();
        stdout.read_to_string(&mut output).map(|_| output)
    });

    let deadline = Instant::now() + settings.timeout;
    let status = loop {
        match child.try_wait().context("poll listing tool")? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                anyhow::bail!("{} timed out after {:?}", settings.tool, settings.timeout);
            }
            None => std::thread::sleep(Duration::from_millis(25)),
        }
    };

    if !status.success() {
        anyhow::bail!("{} exited with {}", settings.tool, status);
    }
    reader
        .join()
        .map_err(|_| anyhow::anyhow!("listing tool reader panicked"))?
        .context("read listing tool output")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn synthetic_devices_enumerate_in_order() {
        let leases = DeviceLeases::new();
        let cameras: Vec<Camera> = (0..6).map(Camera::Synthetic).collect();
        let found = detect_devices_among(&leases, &cameras);
        // Slots 0..4 exist; 4 and 5 do not.
        assert_eq!(
            found,
            vec![
                Camera::Synthetic(0),
                Camera::Synthetic(1),
                Camera::Synthetic(2),
                Camera::Synthetic(3),
            ]
        );
        // Probing released every lease.
        assert!(!leases.is_leased(Camera::Synthetic(0)));
    }

    #[test]
    fn resolutions_are_distinct_and_area_sorted() {
        let leases = DeviceLeases::new();
        let found = detect_resolutions(&leases, Camera::Synthetic(0));

        assert!(!found.is_empty());
        for pair in found.windows(2) {
            assert!(pair[0].area() < pair[1].area(), "not strictly ascending");
        }
        // Several candidates snap to the same mode; duplicates must be gone.
        let mut dedup = found.clone();
        dedup.dedup();
        assert_eq!(dedup, found);
    }

    #[test]
    fn unopenable_camera_yields_empty_resolutions() {
        let leases = DeviceLeases::new();
        let found = detect_resolutions(&leases, Camera::Synthetic(99));
        assert!(found.is_empty());
    }

    #[test]
    fn listing_is_mapped_in_report_order() {
        let output = "[0]: 'MJPG' (Motion-JPEG, compressed)\n[1]: 'YUYV' (YUYV 4:2:2)\n";
        let formats = formats_from_listing(output);
        assert_eq!(formats, vec![PixelFormat::Mjpeg, PixelFormat::Yuyv422]);
    }

    #[test]
    fn duplicate_tokens_map_once() {
        let output = "'MJPG' 'MJPG' mjpeg yuv420";
        let formats = formats_from_listing(output);
        assert_eq!(formats, vec![PixelFormat::Mjpeg, PixelFormat::Yuv420p]);
    }

    #[test]
    fn yuv420p_is_always_present() {
        // Fallback path.
        assert!(ensure_yuv420p(Vec::new()).contains(&PixelFormat::Yuv420p));
        // Prepend path.
        let formats = ensure_yuv420p(vec![PixelFormat::Mjpeg]);
        assert_eq!(formats[0], PixelFormat::Yuv420p);
        // Already-present path keeps report order.
        let formats = ensure_yuv420p(vec![PixelFormat::Yuyv422, PixelFormat::Yuv420p]);
        assert_eq!(formats, vec![PixelFormat::Yuyv422, PixelFormat::Yuv420p]);
    }

    #[test]
    fn missing_tool_falls_back() {
        let settings = ProbeSettings {
            tool: "/nonexistent/listing-tool".to_string(),
            ..ProbeSettings::default()
        };
        let formats = detect_pixel_formats(&settings, Camera::Index(0));
        assert_eq!(formats, FALLBACK_FORMATS.to_vec());
    }

    fn write_script(dir: &std::path::Path, body: &str) -> Result<std::path::PathBuf> {
        let path = dir.join("fake-listing-tool");
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "#!/bin/sh")?;
        writeln!(file, "{}", body)?;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms)?;
        Ok(path)
    }

    #[test]
    fn tool_output_feeds_detection() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let tool = write_script(tmp.path(), "echo \"'YUYV' (YUYV 4:2:2)\"")?;
        let settings = ProbeSettings {
            tool: tool.display().to_string(),
            ..ProbeSettings::default()
        };
        let formats = detect_pixel_formats(&settings, Camera::Index(0));
        // yuv420p prepended ahead of the reported yuyv422.
        assert_eq!(formats, vec![PixelFormat::Yuv420p, PixelFormat::Yuyv422]);
        Ok(())
    }

    #[test]
    fn oversized_listing_is_fully_drained() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        // Well past the pipe buffer size.
        let tool = write_script(tmp.path(), "yes \"'YUYV' (YUYV 4:2:2)\" | head -n 8000")?;
        let settings = ProbeSettings {
            tool: tool.display().to_string(),
            timeout: Duration::from_secs(2),
            ..ProbeSettings::default()
        };
        let formats = detect_pixel_formats(&settings, Camera::Index(0));
        // The report is parsed, not collapsed into the fallback set.
        assert_eq!(formats, vec![PixelFormat::Yuv420p, PixelFormat::Yuyv422]);
        Ok(())
    }

    #[test]
    fn slow_tool_times_out_into_fallback() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let tool = write_script(tmp.path(), "sleep 10")?;
        let settings = ProbeSettings {
            tool: tool.display().to_string(),
            timeout: Duration::from_millis(200),
            ..ProbeSettings::default()
        };
        let formats = detect_pixel_formats(&settings, Camera::Index(0));
        assert_eq!(formats, FALLBACK_FORMATS.to_vec());
        Ok(())
    }
}
