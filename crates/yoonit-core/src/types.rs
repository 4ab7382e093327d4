use crate::payload::ImageRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Selects which analysis pipeline runs while capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureType {
    /// Detect faces and emit cropped face images.
    Face,
    /// Emit whole camera frames.
    Frame,
    /// Decode barcodes and emit their content.
    Qrcode,
    /// Preview only, no analysis.
    None,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported capture type: {0:?} (expected face, frame, qrcode or none)")]
pub struct UnsupportedCaptureType(pub String);

impl CaptureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureType::Face => "face",
            CaptureType::Frame => "frame",
            CaptureType::Qrcode => "qrcode",
            CaptureType::None => "none",
        }
    }

    /// Whether sessions of this type produce `ImageCaptured` events.
    pub fn produces_images(&self) -> bool {
        matches!(self, CaptureType::Face | CaptureType::Frame)
    }
}

impl FromStr for CaptureType {
    type Err = UnsupportedCaptureType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "face" => Ok(CaptureType::Face),
            "frame" => Ok(CaptureType::Frame),
            "qrcode" | "barcode" => Ok(CaptureType::Qrcode),
            "none" | "" => Ok(CaptureType::None),
            _ => Err(UnsupportedCaptureType(s.to_string())),
        }
    }
}

impl fmt::Display for CaptureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera lens facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lens {
    #[default]
    Front,
    Back,
}

impl Lens {
    /// Numeric lens id as reported to applications (front = 0, back = 1).
    pub fn id(&self) -> u8 {
        match self {
            Lens::Front => 0,
            Lens::Back => 1,
        }
    }

    pub fn toggled(&self) -> Lens {
        match self {
            Lens::Front => Lens::Back,
            Lens::Back => Lens::Front,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lens::Front => "front",
            Lens::Back => "back",
        }
    }
}

impl FromStr for Lens {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" | "0" => Ok(Lens::Front),
            "back" | "1" => Ok(Lens::Back),
            other => Err(format!("unknown lens: {other:?} (expected front or back)")),
        }
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Error,
    Message,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Error => "error",
            StatusKind::Message => "message",
        }
    }
}

/// Events flowing from the capture engine to the application.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    ImageCaptured {
        capture_type: CaptureType,
        /// 1-based index of this image within the session.
        count: u32,
        /// Images requested for the session; 0 means unbounded.
        total: u32,
        image: ImageRef,
    },
    FaceDetected(FaceBox),
    FaceUndetected,
    EndCapture,
    BarcodeScanned { content: String },
    Status { kind: StatusKind, text: String },
    PermissionDenied,
}

impl CameraEvent {
    pub fn error(text: impl Into<String>) -> Self {
        CameraEvent::Status {
            kind: StatusKind::Error,
            text: text.into(),
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        CameraEvent::Status {
            kind: StatusKind::Message,
            text: text.into(),
        }
    }

    /// Canonical event name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            CameraEvent::ImageCaptured { .. } => "imageCaptured",
            CameraEvent::FaceDetected(_) => "faceDetected",
            CameraEvent::FaceUndetected => "faceUndetected",
            CameraEvent::EndCapture => "endCapture",
            CameraEvent::BarcodeScanned { .. } => "barcodeScanned",
            CameraEvent::Status { .. } => "status",
            CameraEvent::PermissionDenied => "permissionDenied",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_type_parse() {
        assert_eq!("face".parse::<CaptureType>().unwrap(), CaptureType::Face);
        assert_eq!("FRAME".parse::<CaptureType>().unwrap(), CaptureType::Frame);
        assert_eq!("qrcode".parse::<CaptureType>().unwrap(), CaptureType::Qrcode);
        assert_eq!("barcode".parse::<CaptureType>().unwrap(), CaptureType::Qrcode);
        assert_eq!("none".parse::<CaptureType>().unwrap(), CaptureType::None);
    }

    #[test]
    fn test_capture_type_unknown() {
        let err = "selfie".parse::<CaptureType>().unwrap_err();
        assert_eq!(err, UnsupportedCaptureType("selfie".into()));
        assert!(err.to_string().contains("selfie"));
    }

    #[test]
    fn test_lens_ids_and_toggle() {
        assert_eq!(Lens::Front.id(), 0);
        assert_eq!(Lens::Back.id(), 1);
        assert_eq!(Lens::Front.toggled(), Lens::Back);
        assert_eq!(Lens::Back.toggled().toggled(), Lens::Back);
        assert_eq!("1".parse::<Lens>().unwrap(), Lens::Back);
        assert!("side".parse::<Lens>().is_err());
    }

    #[test]
    fn test_event_names_are_distinct() {
        let names = [
            CameraEvent::FaceDetected(FaceBox::new(0.0, 0.0, 1.0, 1.0)).name(),
            CameraEvent::FaceUndetected.name(),
            CameraEvent::EndCapture.name(),
            CameraEvent::BarcodeScanned { content: "x".into() }.name(),
            CameraEvent::error("boom").name(),
            CameraEvent::PermissionDenied.name(),
        ];
        let mut sorted = names.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
