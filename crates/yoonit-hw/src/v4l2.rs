//! V4L2 camera backend via the `v4l` crate.
//!
//! Each lens maps to its own `/dev/videoN` node. The backend produces
//! grayscale frames only; it has no face detector or barcode decoder.

use crate::device::{CameraDevice, DeviceCapabilities, DeviceError, Sample};
use crate::frame::{self, Frame};
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;
use yoonit_core::{CaptureConfig, Lens};

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn to_grayscale(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, DeviceError> {
        let pixels = (width * height) as usize;
        match self {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(DeviceError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
                .map_err(|e| DeviceError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }
}

// The stream shares the device handle; dropping it turns streaming off and
// closes the node.
struct OpenDevice {
    stream: MmapStream<'static>,
    path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// V4L2 backend with one device node per lens.
pub struct V4l2Camera {
    front_path: String,
    back_path: String,
    open: Option<OpenDevice>,
}

impl V4l2Camera {
    pub fn new(front_path: impl Into<String>, back_path: impl Into<String>) -> Self {
        Self {
            front_path: front_path.into(),
            back_path: back_path.into(),
            open: None,
        }
    }

    pub fn device_path(&self, lens: Lens) -> &str {
        match lens {
            Lens::Front => &self.front_path,
            Lens::Back => &self.back_path,
        }
    }

    fn open_path(device_path: &str) -> Result<OpenDevice, DeviceError> {
        if !Path::new(device_path).exists() {
            return Err(DeviceError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                DeviceError::DeviceBusy
            } else {
                DeviceError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            DeviceError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(DeviceError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            DeviceError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            DeviceError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(DeviceError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| DeviceError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera opened"
        );

        Ok(OpenDevice {
            stream,
            path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }
}

impl CameraDevice for V4l2Camera {
    fn open(&mut self, lens: Lens) -> Result<(), DeviceError> {
        if self.open.is_some() {
            return Err(DeviceError::DeviceBusy);
        }
        let path = self.device_path(lens).to_string();
        self.open = Some(Self::open_path(&path)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(dev) = self.open.take() {
            tracing::info!(device = %dev.path, "camera closed");
        }
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            face_detection: false,
            barcode_decoding: false,
        }
    }

    fn apply_config(&mut self, config: &CaptureConfig) {
        tracing::debug!(
            detection_box = config.detection_box,
            roi_enabled = config.roi.enabled,
            "v4l2 backend has no overlay; config noted"
        );
    }

    fn next_sample(&mut self) -> Result<Sample, DeviceError> {
        let dev = self.open.as_mut().ok_or(DeviceError::NotOpen)?;
        let (width, height, pixel_format) = (dev.width, dev.height, dev.pixel_format);

        let (buf, meta) = dev
            .stream
            .next()
            .map_err(|e| DeviceError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let gray = pixel_format.to_grayscale(buf, width, height)?;
        let is_dark = frame::is_dark_frame(&gray, frame::DARK_FRAME_THRESHOLD);

        Ok(Sample::frame_only(Frame {
            data: gray,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }))
    }
}
