//! Engine configuration.
//!
//! Loaded once at startup from an optional JSON file (`LAPSE_CONFIG`) with
//! `LAPSE_*` environment overrides on top. Nothing is persisted back.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::capture::RetrySettings;
use crate::encode::EncoderSettings;
use crate::probe::ProbeSettings;

const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    encoder: Option<EncoderConfigFile>,
    probe: Option<ProbeConfigFile>,
    capture: Option<CaptureConfigFile>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct EncoderConfigFile {
    program: Option<String>,
    codec: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeConfigFile {
    tool: Option<String>,
    timeout_secs: Option<u64>,
    max_devices: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    open_attempts: Option<u32>,
    open_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub encoder: EncoderSettings,
    pub probe: ProbeSettings,
    pub retry: RetrySettings,
    /// Quality for stored and streamed JPEG frames (1..=100).
    pub jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderSettings::default(),
            probe: ProbeSettings::default(),
            retry: RetrySettings::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LAPSE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let mut cfg = Self::default();
        if let Some(encoder) = file.encoder {
            if let Some(program) = encoder.program {
                cfg.encoder.program = program;
            }
            if let Some(codec) = encoder.codec {
                cfg.encoder.codec = codec;
            }
        }
        if let Some(probe) = file.probe {
            if let Some(tool) = probe.tool {
                cfg.probe.tool = tool;
            }
            if let Some(secs) = probe.timeout_secs {
                cfg.probe.timeout = Duration::from_secs(secs);
            }
            if let Some(max) = probe.max_devices {
                cfg.probe.max_devices = max;
            }
        }
        if let Some(capture) = file.capture {
            if let Some(attempts) = capture.open_attempts {
                cfg.retry.attempts = attempts;
            }
            if let Some(ms) = capture.open_backoff_ms {
                cfg.retry.backoff = Duration::from_millis(ms);
            }
        }
        if let Some(quality) = file.jpeg_quality {
            cfg.jpeg_quality = quality;
        }
        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(program) = std::env::var("LAPSE_ENCODER") {
            if !program.trim().is_empty() {
                self.encoder.program = program;
            }
        }
        if let Ok(codec) = std::env::var("LAPSE_ENCODER_CODEC") {
            if !codec.trim().is_empty() {
                self.encoder.codec = codec;
            }
        }
        if let Ok(tool) = std::env::var("LAPSE_PROBE_TOOL") {
            if !tool.trim().is_empty() {
                self.probe.tool = tool;
            }
        }
        if let Ok(max) = std::env::var("LAPSE_MAX_DEVICES") {
            self.probe.max_devices = max
                .parse()
                .map_err(|_| anyhow!("LAPSE_MAX_DEVICES must be an integer"))?;
        }
        if let Ok(attempts) = std::env::var("LAPSE_OPEN_ATTEMPTS") {
            self.retry.attempts = attempts
                .parse()
                .map_err(|_| anyhow!("LAPSE_OPEN_ATTEMPTS must be an integer"))?;
        }
        if let Ok(quality) = std::env::var("LAPSE_JPEG_QUALITY") {
            self.jpeg_quality = quality
                .parse()
                .map_err(|_| anyhow!("LAPSE_JPEG_QUALITY must be an integer 1..=100"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.probe.max_devices == 0 {
            return Err(anyhow!("probe max_devices must be at least 1"));
        }
        if self.retry.attempts == 0 {
            return Err(anyhow!("capture open_attempts must be at least 1"));
        }
        if self.probe.timeout.is_zero() {
            return Err(anyhow!("probe timeout must be positive"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
