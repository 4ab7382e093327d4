//! Backend contract between the capture engine and a camera.

use crate::frame::Frame;
use thiserror::Error;
use yoonit_core::{CaptureConfig, CaptureType, FaceBox, Lens};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("device not open")]
    NotOpen,
}

/// What a backend can analyse beyond producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub face_detection: bool,
    pub barcode_decoding: bool,
}

impl DeviceCapabilities {
    pub fn supports(&self, capture_type: CaptureType) -> bool {
        match capture_type {
            CaptureType::Face => self.face_detection,
            CaptureType::Qrcode => self.barcode_decoding,
            CaptureType::Frame | CaptureType::None => true,
        }
    }
}

/// One frame plus whatever the backend detected in it.
#[derive(Clone)]
pub struct Sample {
    pub frame: Frame,
    /// Detected faces, largest first.
    pub faces: Vec<FaceBox>,
    /// Decoded barcode contents.
    pub barcodes: Vec<String>,
}

impl Sample {
    pub fn frame_only(frame: Frame) -> Self {
        Self {
            frame,
            faces: Vec::new(),
            barcodes: Vec::new(),
        }
    }
}

/// A camera the engine drives from its own thread.
///
/// `open` must fail rather than open a second handle while one is open;
/// the engine always closes before reopening.
pub trait CameraDevice: Send {
    fn open(&mut self, lens: Lens) -> Result<(), DeviceError>;

    /// Release the camera. Safe to call when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Receive the current capture configuration (detection box, ROI, ...).
    fn apply_config(&mut self, _config: &CaptureConfig) {}

    /// Block until the next frame is available.
    fn next_sample(&mut self) -> Result<Sample, DeviceError>;
}

impl CameraDevice for Box<dyn CameraDevice> {
    fn open(&mut self, lens: Lens) -> Result<(), DeviceError> {
        self.as_mut().open(lens)
    }

    fn close(&mut self) {
        self.as_mut().close()
    }

    fn is_open(&self) -> bool {
        self.as_ref().is_open()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.as_ref().capabilities()
    }

    fn apply_config(&mut self, config: &CaptureConfig) {
        self.as_mut().apply_config(config)
    }

    fn next_sample(&mut self) -> Result<Sample, DeviceError> {
        self.as_mut().next_sample()
    }
}
