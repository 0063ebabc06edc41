//! lapsed - timelapse engine CLI
//!
//! Thin collaborator surface over the engine facade:
//! 1. Enumerate cameras, resolutions, and pixel formats (JSON on stdout)
//! 2. Run a capture job to completion
//! 3. Pipe a live multipart-JPEG preview to stdout or a file

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use lapse_engine::{
    Camera, CaptureRequest, Engine, EngineConfig, PixelFormat, Resolution,
    MULTIPART_CONTENT_TYPE,
};

#[derive(Parser)]
#[command(name = "lapsed", version, about = "Timelapse capture engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available camera indices.
    Devices,
    /// List distinct supported resolutions for a camera.
    Resolutions {
        /// Camera index (or synth:N for the synthetic camera).
        #[arg(env = "LAPSE_DEVICE", default_value = "0")]
        device: String,
    },
    /// List advertised pixel formats for a camera.
    Formats {
        #[arg(env = "LAPSE_DEVICE", default_value = "0")]
        device: String,
    },
    /// Capture a timelapse and encode it.
    Capture {
        #[arg(long, env = "LAPSE_DEVICE", default_value = "0")]
        device: String,
        /// Total capture duration in seconds.
        #[arg(long)]
        duration: f64,
        /// Seconds between stored frames.
        #[arg(long)]
        interval: f64,
        /// Frame rate of the encoded output.
        #[arg(long, default_value_t = 24)]
        fps: u32,
        /// Output video path (extension constrained to mov/mp4/avi).
        #[arg(long, default_value = "timelapse.mp4")]
        output: PathBuf,
        /// Frame store directory.
        #[arg(long, default_value = "frames")]
        frames_dir: PathBuf,
        /// Desired resolution as WIDTHxHEIGHT.
        #[arg(long)]
        resolution: Option<String>,
        /// Encoder pixel format (defaults to yuv420p).
        #[arg(long)]
        pix_fmt: Option<String>,
    },
    /// Stream a live multipart-JPEG preview until Ctrl-C.
    Preview {
        #[arg(long, env = "LAPSE_DEVICE", default_value = "0")]
        device: String,
        #[arg(long)]
        resolution: Option<String>,
        /// Stop after this many chunks instead of running until Ctrl-C.
        #[arg(long)]
        frames: Option<u64>,
        /// Write chunks here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Parse a seconds argument; negative, NaN, and non-finite values are
/// argument errors, not panics.
fn secs_arg(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("--{} must be a non-negative number of seconds, got {}", flag, value))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let engine = Engine::new(EngineConfig::load()?);

    match cli.command {
        Command::Devices => {
            let devices = engine.devices();
            println!("{}", serde_json::to_string(&devices)?);
        }
        Command::Resolutions { device } => {
            let camera: Camera = device.parse()?;
            let resolutions = engine.resolutions(camera);
            println!("{}", serde_json::to_string(&resolutions)?);
        }
        Command::Formats { device } => {
            let camera: Camera = device.parse()?;
            let formats = engine.pixel_formats(camera);
            println!("{}", serde_json::to_string(&formats)?);
        }
        Command::Capture {
            device,
            duration,
            interval,
            fps,
            output,
            frames_dir,
            resolution,
            pix_fmt,
        } => {
            let camera: Camera = device.parse()?;
            let resolution = resolution
                .as_deref()
                .map(str::parse::<Resolution>)
                .transpose()?;
            let pixel_format = pix_fmt
                .as_deref()
                .map(str::parse::<PixelFormat>)
                .transpose()?;

            let request = CaptureRequest {
                camera,
                duration: secs_arg(duration, "duration")?,
                interval: secs_arg(interval, "interval")?,
                output_fps: fps,
                output_path: output,
                frames_dir,
                resolution,
                pixel_format,
            };
            let handle = engine.start_capture(request)?;
            let summary = handle.join()?;
            log::info!(
                "captured {} frames, wrote {}",
                summary.frames_stored,
                summary.output_path.display()
            );
        }
        Command::Preview {
            device,
            resolution,
            frames,
            output,
        } => {
            let camera: Camera = device.parse()?;
            let resolution = resolution
                .as_deref()
                .map(str::parse::<Resolution>)
                .transpose()?;

            let stream = engine.open_preview(camera, resolution)?;
            let token = stream.cancel_token();
            ctrlc::set_handler(move || token.cancel()).context("install Ctrl-C handler")?;

            log::info!("preview on {} ({})", camera, MULTIPART_CONTENT_TYPE);
            let mut sink: Box<dyn Write> = match output {
                Some(path) => Box::new(
                    std::fs::File::create(&path)
                        .with_context(|| format!("create {}", path.display()))?,
                ),
                None => Box::new(std::io::stdout().lock()),
            };

            for (count, chunk) in stream.enumerate() {
                sink.write_all(&chunk).context("write preview chunk")?;
                if let Some(limit) = frames {
                    if count as u64 + 1 >= limit {
                        break;
                    }
                }
            }
            sink.flush().ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_arguments_reject_invalid_floats() {
        assert!(secs_arg(-5.0, "duration").is_err());
        assert!(secs_arg(f64::NAN, "duration").is_err());
        assert!(secs_arg(f64::INFINITY, "interval").is_err());
        assert_eq!(
            secs_arg(1.5, "interval").unwrap(),
            Duration::from_millis(1500)
        );
    }
}
