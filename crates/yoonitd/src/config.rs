use std::path::PathBuf;
use yoonit_core::{CaptureConfig, ConfigError, Lens};

/// Camera backend the daemon drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Real cameras through V4L2.
    V4l2,
    /// Synthetic frames with scripted detections.
    Scripted,
}

/// Which message bus the service is exported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    pub backend: Backend,
    /// V4L2 device path for the front lens (default: /dev/video0).
    pub front_device: String,
    /// V4L2 device path for the back lens (default: /dev/video2).
    pub back_device: String,
    /// Lens selected at startup.
    pub initial_lens: Lens,
    /// Directory captured images are written to when saving is on.
    pub output_dir: PathBuf,
    /// Optional TOML file with the initial capture configuration.
    pub capture_config_path: Option<PathBuf>,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `YOONIT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let output_dir = std::env::var("YOONIT_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("yoonit")
                    .join("captures")
            });

        let backend = match env_string("YOONIT_BACKEND", "v4l2").to_ascii_lowercase().as_str() {
            "scripted" | "demo" => Backend::Scripted,
            _ => Backend::V4l2,
        };

        let bus = match env_string("YOONIT_BUS", "session").to_ascii_lowercase().as_str() {
            "system" => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            backend,
            front_device: env_string("YOONIT_FRONT_DEVICE", "/dev/video0"),
            back_device: env_string("YOONIT_BACK_DEVICE", "/dev/video2"),
            initial_lens: env_string("YOONIT_LENS", "front").parse().unwrap_or_default(),
            output_dir,
            capture_config_path: std::env::var("YOONIT_CONFIG").ok().map(PathBuf::from),
            bus,
        }
    }

    /// Initial capture configuration: the TOML file if set, defaults otherwise.
    pub fn capture_config(&self) -> Result<CaptureConfig, ConfigError> {
        match &self.capture_config_path {
            Some(path) => CaptureConfig::load(path),
            None => Ok(CaptureConfig::default()),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
