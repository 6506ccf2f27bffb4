use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    Immediate,
    FinishTrack,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub default_playlist: Option<String>,
    pub shuffle: bool,
    pub shuffle_carry_over: usize,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            default_playlist: None,
            shuffle: false,
            shuffle_carry_over: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SoundcardConfig {
    pub enabled: bool,
    pub device: Option<String>,
}

impl Default for SoundcardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub codec: String,
    pub bitrate: String,
    pub format: String,
    pub embed_metadata: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1234,
            codec: "aac".to_string(),
            bitrate: "192k".to_string(),
            format: "mpegts".to_string(),
            embed_metadata: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    pub soundcard: SoundcardConfig,
    pub udp: UdpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransitionsConfig {
    pub default: TransitionPolicy,
    /// Reserved until crossfade transitions land; parsed but not applied.
    pub crossfade_duration: f64,
}

impl Default for TransitionsConfig {
    fn default() -> Self {
        Self {
            default: TransitionPolicy::FinishTrack,
            crossfade_duration: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub playlists_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            playlists_dir: PathBuf::from("Managed/Playlists"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playout: PlayoutConfig,
    pub outputs: OutputsConfig,
    pub transitions: TransitionsConfig,
    pub web: WebConfig,
    pub paths: PathsConfig,
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is missing
    /// or malformed. Configuration never fails the engine.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let raw = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                warn!("could not read {}: {e}", path.display());
                return Self::default();
            }
        };
        match toml::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("malformed config {}: {e}", path.display());
                Self::default()
            }
        }
    }
}
