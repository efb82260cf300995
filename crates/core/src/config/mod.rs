use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{timeline::IdleStrategy, Result};

/// Ramp used when neither the config file nor the command line picks one.
pub const DEFAULT_PALETTE: &str = " .:-=+*#%@";

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub decoder: DecoderConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// External programs used to probe and decode the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Configuration specific to the playback loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub palette: String,
    pub idle: IdleStrategy,
    /// Poll the decoder process after every frame and stop once it exits.
    pub poll_decoder: bool,
    /// Frame rate assumed when the prober is skipped and none is given.
    pub default_fps: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.to_string(),
            idle: IdleStrategy::Spin,
            poll_decoder: true,
            default_fps: 30,
        }
    }
}
