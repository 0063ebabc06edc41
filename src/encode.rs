//! Encoder invoker.
//!
//! After a capture job finishes, the stored frame sequence is handed to an
//! external encoder (ffmpeg by default) as a subprocess. The invocation is
//! awaited: exit status and stderr are captured, and failure surfaces as
//! `EngineError::EncodeFailed` through the job result.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::formats::PixelFormat;
use crate::EngineError;

/// Output container extensions the encoder contract allows.
pub const ALLOWED_OUTPUT_EXTENSIONS: [&str; 3] = ["mov", "mp4", "avi"];

const DEFAULT_OUTPUT_EXTENSION: &str = "mp4";

/// External encoder invocation settings.
#[derive(Clone, Debug)]
pub struct EncoderSettings {
    /// Encoder executable, resolved via PATH.
    pub program: String,
    /// Video codec passed as `-c:v`.
    pub codec: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
        }
    }
}

/// Constrain the output path's extension to the allowed set.
///
/// A missing or unrecognized extension becomes `.mp4`; allowed extensions
/// are preserved as-is.
pub fn normalize_output_path(path: &Path) -> PathBuf {
    let allowed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            ALLOWED_OUTPUT_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false);
    if allowed {
        return path.to_path_buf();
    }

    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(DEFAULT_OUTPUT_EXTENSION);
    path.with_file_name(name)
}

/// Encode the frame sequence matched by `frames_glob` into `output`.
///
/// Blocks until the encoder exits. The pixel format defaults to yuv420p when
/// unset. Non-zero exit or a failed spawn both yield `EncodeFailed` with
/// whatever stderr was captured.
pub fn encode_timelapse(
    settings: &EncoderSettings,
    frames_glob: &str,
    output_fps: u32,
    pixel_format: Option<PixelFormat>,
    output: &Path,
) -> Result<()> {
    let pix_fmt = pixel_format.unwrap_or(PixelFormat::DEFAULT);
    log::info!(
        "encoding {} at {} fps ({}) into {}",
        frames_glob,
        output_fps,
        pix_fmt,
        output.display()
    );

    let result = Command::new(&settings.program)
        .arg("-y")
        .args(["-framerate", &output_fps.to_string()])
        .args(["-pattern_type", "glob"])
        .args(["-i", frames_glob])
        .args(["-c:v", &settings.codec])
        .args(["-pix_fmt", pix_fmt.as_str()])
        .arg(output)
        .output();

    let captured = match result {
        Ok(captured) => captured,
        Err(e) => {
            return Err(EngineError::EncodeFailed {
                status: None,
                stderr: format!("failed to invoke '{}': {}", settings.program, e),
            }
            .into());
        }
    };

    if !captured.status.success() {
        return Err(EngineError::EncodeFailed {
            status: captured.status.code(),
            stderr: String::from_utf8_lossy(&captured.stderr).into_owned(),
        }
        .into());
    }

    log::info!("timelapse written to {}", output.display());
    Ok(())
}
