//! Capture configuration surface.
//!
//! All percentages are fractions in `[0, 1]`. Out-of-range values are
//! rejected with the offending field name, never clamped.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const DEFAULT_TIME_BETWEEN_IMAGES_MS: u64 = 1000;
const DEFAULT_OUTPUT_IMAGE_SIZE: u32 = 200;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("failed to read config file: {0}")]
    FileRead(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the rejected field, if the error concerns a single field.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Region of interest inside the camera frame, as offsets from each edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    pub enabled: bool,
    pub top_offset: f32,
    pub right_offset: f32,
    pub bottom_offset: f32,
    pub left_offset: f32,
    /// Minimum face width relative to the ROI width.
    pub min_size: f32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_offset: 0.0,
            right_offset: 0.0,
            bottom_offset: 0.0,
            left_offset: 0.0,
            min_size: 0.0,
        }
    }
}

/// Per-session capture parameters applied to the camera engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Images per session; 0 captures until stopped.
    pub number_of_images: u32,
    /// Minimum delay between two captured images, in milliseconds.
    pub time_between_images: u64,
    /// Extra margin around the face box when cropping.
    pub padding_percent: f32,
    /// Minimum face width relative to the frame width.
    pub capture_min_size: f32,
    /// Maximum face width relative to the frame width.
    pub capture_max_size: f32,
    pub output_image_width: u32,
    pub output_image_height: u32,
    /// Ask the engine to draw the face detection box.
    pub detection_box: bool,
    /// Persist captured images to the output directory.
    pub save_image: bool,
    pub roi: RoiConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            number_of_images: 0,
            time_between_images: DEFAULT_TIME_BETWEEN_IMAGES_MS,
            padding_percent: 0.0,
            capture_min_size: 0.0,
            capture_max_size: 1.0,
            output_image_width: DEFAULT_OUTPUT_IMAGE_SIZE,
            output_image_height: DEFAULT_OUTPUT_IMAGE_SIZE,
            detection_box: false,
            save_image: false,
            roi: RoiConfig::default(),
        }
    }
}

/// A single setter call on the configuration surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigUpdate {
    NumberOfImages(u32),
    TimeBetweenImages(u64),
    PaddingPercent(f32),
    CaptureMinSize(f32),
    CaptureMaxSize(f32),
    OutputImageWidth(u32),
    OutputImageHeight(u32),
    DetectionBox(bool),
    SaveImage(bool),
    RoiEnabled(bool),
    RoiTopOffset(f32),
    RoiRightOffset(f32),
    RoiBottomOffset(f32),
    RoiLeftOffset(f32),
    RoiMinSize(f32),
}

impl ConfigUpdate {
    /// Field name this update targets.
    pub fn field(&self) -> &'static str {
        match self {
            ConfigUpdate::NumberOfImages(_) => "number_of_images",
            ConfigUpdate::TimeBetweenImages(_) => "time_between_images",
            ConfigUpdate::PaddingPercent(_) => "padding_percent",
            ConfigUpdate::CaptureMinSize(_) => "capture_min_size",
            ConfigUpdate::CaptureMaxSize(_) => "capture_max_size",
            ConfigUpdate::OutputImageWidth(_) => "output_image_width",
            ConfigUpdate::OutputImageHeight(_) => "output_image_height",
            ConfigUpdate::DetectionBox(_) => "detection_box",
            ConfigUpdate::SaveImage(_) => "save_image",
            ConfigUpdate::RoiEnabled(_) => "roi.enabled",
            ConfigUpdate::RoiTopOffset(_) => "roi.top_offset",
            ConfigUpdate::RoiRightOffset(_) => "roi.right_offset",
            ConfigUpdate::RoiBottomOffset(_) => "roi.bottom_offset",
            ConfigUpdate::RoiLeftOffset(_) => "roi.left_offset",
            ConfigUpdate::RoiMinSize(_) => "roi.min_size",
        }
    }

    /// Build an update from an option name and its textual value.
    ///
    /// Accepts the field names above with either `_` or `-` separators.
    pub fn parse(option: &str, value: &str) -> Result<Self, ConfigError> {
        let key = option.trim().to_ascii_lowercase().replace('-', "_");
        let value = value.trim();
        let update = match key.as_str() {
            "number_of_images" => ConfigUpdate::NumberOfImages(parse_num(value, "number_of_images")?),
            "time_between_images" => {
                ConfigUpdate::TimeBetweenImages(parse_num(value, "time_between_images")?)
            }
            "padding_percent" => ConfigUpdate::PaddingPercent(parse_num(value, "padding_percent")?),
            "capture_min_size" => ConfigUpdate::CaptureMinSize(parse_num(value, "capture_min_size")?),
            "capture_max_size" => ConfigUpdate::CaptureMaxSize(parse_num(value, "capture_max_size")?),
            "output_image_width" => {
                ConfigUpdate::OutputImageWidth(parse_num(value, "output_image_width")?)
            }
            "output_image_height" => {
                ConfigUpdate::OutputImageHeight(parse_num(value, "output_image_height")?)
            }
            "detection_box" => ConfigUpdate::DetectionBox(parse_num(value, "detection_box")?),
            "save_image" => ConfigUpdate::SaveImage(parse_num(value, "save_image")?),
            "roi_enabled" | "roi.enabled" => ConfigUpdate::RoiEnabled(parse_num(value, "roi.enabled")?),
            "roi_top_offset" | "roi.top_offset" => {
                ConfigUpdate::RoiTopOffset(parse_num(value, "roi.top_offset")?)
            }
            "roi_right_offset" | "roi.right_offset" => {
                ConfigUpdate::RoiRightOffset(parse_num(value, "roi.right_offset")?)
            }
            "roi_bottom_offset" | "roi.bottom_offset" => {
                ConfigUpdate::RoiBottomOffset(parse_num(value, "roi.bottom_offset")?)
            }
            "roi_left_offset" | "roi.left_offset" => {
                ConfigUpdate::RoiLeftOffset(parse_num(value, "roi.left_offset")?)
            }
            "roi_min_size" | "roi.min_size" => ConfigUpdate::RoiMinSize(parse_num(value, "roi.min_size")?),
            _ => return Err(ConfigError::UnknownOption(option.to_string())),
        };
        Ok(update)
    }
}

fn parse_num<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("cannot parse {value:?}")))
}

fn check_fraction(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
    }
}

fn check_dimension(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}

impl CaptureConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: CaptureConfig =
            toml::from_str(src).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&src)
    }

    /// Check every field and the cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_fraction("padding_percent", self.padding_percent)?;
        check_fraction("capture_min_size", self.capture_min_size)?;
        check_fraction("capture_max_size", self.capture_max_size)?;
        check_dimension("output_image_width", self.output_image_width)?;
        check_dimension("output_image_height", self.output_image_height)?;
        check_fraction("roi.top_offset", self.roi.top_offset)?;
        check_fraction("roi.right_offset", self.roi.right_offset)?;
        check_fraction("roi.bottom_offset", self.roi.bottom_offset)?;
        check_fraction("roi.left_offset", self.roi.left_offset)?;
        check_fraction("roi.min_size", self.roi.min_size)?;

        if self.capture_min_size > self.capture_max_size {
            return Err(ConfigError::invalid(
                "capture_min_size",
                format!(
                    "min size {} exceeds max size {}",
                    self.capture_min_size, self.capture_max_size
                ),
            ));
        }
        if self.roi.top_offset + self.roi.bottom_offset >= 1.0 {
            return Err(ConfigError::invalid(
                "roi.top_offset",
                "top and bottom offsets leave no vertical region",
            ));
        }
        if self.roi.left_offset + self.roi.right_offset >= 1.0 {
            return Err(ConfigError::invalid(
                "roi.left_offset",
                "left and right offsets leave no horizontal region",
            ));
        }
        Ok(())
    }

    /// Apply one setter. On error the config is left untouched and the
    /// error names the field being set.
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<(), ConfigError> {
        let field = update.field();
        let mut next = self.clone();
        match update {
            ConfigUpdate::NumberOfImages(n) => next.number_of_images = n,
            ConfigUpdate::TimeBetweenImages(ms) => next.time_between_images = ms,
            ConfigUpdate::PaddingPercent(v) => next.padding_percent = v,
            ConfigUpdate::CaptureMinSize(v) => next.capture_min_size = v,
            ConfigUpdate::CaptureMaxSize(v) => next.capture_max_size = v,
            ConfigUpdate::OutputImageWidth(v) => next.output_image_width = v,
            ConfigUpdate::OutputImageHeight(v) => next.output_image_height = v,
            ConfigUpdate::DetectionBox(on) => next.detection_box = on,
            ConfigUpdate::SaveImage(on) => next.save_image = on,
            ConfigUpdate::RoiEnabled(on) => next.roi.enabled = on,
            ConfigUpdate::RoiTopOffset(v) => next.roi.top_offset = v,
            ConfigUpdate::RoiRightOffset(v) => next.roi.right_offset = v,
            ConfigUpdate::RoiBottomOffset(v) => next.roi.bottom_offset = v,
            ConfigUpdate::RoiLeftOffset(v) => next.roi.left_offset = v,
            ConfigUpdate::RoiMinSize(v) => next.roi.min_size = v,
        }

        next.validate().map_err(|e| match e {
            ConfigError::Invalid { reason, .. } => ConfigError::Invalid { field, reason },
            other => other,
        })?;

        *self = next;
        Ok(())
    }
}
