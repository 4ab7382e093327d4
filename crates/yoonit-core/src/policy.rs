//! Face acceptance rules and face presence tracking.

use crate::config::{CaptureConfig, RoiConfig};
use crate::types::{CameraEvent, FaceBox};

/// Why a detected face was not accepted for capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceRejection {
    MinSize,
    MaxSize,
    OutOfRoi,
    RoiMinSize,
}

impl FaceRejection {
    /// Status message code reported to the application.
    pub fn code(&self) -> &'static str {
        match self {
            FaceRejection::MinSize => "INVALID_CAPTURE_FACE_MIN_SIZE",
            FaceRejection::MaxSize => "INVALID_CAPTURE_FACE_MAX_SIZE",
            FaceRejection::OutOfRoi => "INVALID_CAPTURE_FACE_OUT_OF_ROI",
            FaceRejection::RoiMinSize => "INVALID_CAPTURE_FACE_ROI_MIN_SIZE",
        }
    }
}

/// ROI rectangle in frame pixels.
pub fn roi_rect(roi: &RoiConfig, frame_width: u32, frame_height: u32) -> FaceBox {
    let w = frame_width as f32;
    let h = frame_height as f32;
    let x = roi.left_offset * w;
    let y = roi.top_offset * h;
    FaceBox::new(
        x,
        y,
        w * (1.0 - roi.left_offset - roi.right_offset),
        h * (1.0 - roi.top_offset - roi.bottom_offset),
    )
}

/// Check a detected face against the size bounds and, if enabled, the ROI.
pub fn evaluate_face(
    face: &FaceBox,
    frame_width: u32,
    frame_height: u32,
    config: &CaptureConfig,
) -> Result<(), FaceRejection> {
    if frame_width == 0 || frame_height == 0 {
        return Err(FaceRejection::MinSize);
    }

    let relative = face.width / frame_width as f32;
    if relative < config.capture_min_size {
        return Err(FaceRejection::MinSize);
    }
    if relative > config.capture_max_size {
        return Err(FaceRejection::MaxSize);
    }

    if config.roi.enabled {
        let roi = roi_rect(&config.roi, frame_width, frame_height);
        let inside = face.x >= roi.x
            && face.y >= roi.y
            && face.right() <= roi.right()
            && face.bottom() <= roi.bottom();
        if !inside {
            return Err(FaceRejection::OutOfRoi);
        }
        if roi.width > 0.0 && face.width / roi.width < config.roi.min_size {
            return Err(FaceRejection::RoiMinSize);
        }
    }

    Ok(())
}

/// Pixel crop rectangle `(x, y, width, height)` around a face, grown by
/// `padding` of the face size on every side and clamped to the frame.
pub fn padded_crop(face: &FaceBox, padding: f32, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
    let pad_x = face.width * padding;
    let pad_y = face.height * padding;
    let x0 = (face.x - pad_x).max(0.0);
    let y0 = (face.y - pad_y).max(0.0);
    let x1 = (face.right() + pad_x).min(frame_width as f32);
    let y1 = (face.bottom() + pad_y).min(frame_height as f32);

    let x = (x0.floor() as u32).min(frame_width.saturating_sub(1));
    let y = (y0.floor() as u32).min(frame_height.saturating_sub(1));
    let width = ((x1.ceil() as u32).saturating_sub(x)).max(1);
    let height = ((y1.ceil() as u32).saturating_sub(y)).max(1);
    (x, y, width, height)
}

/// Turns per-frame face observations into alternating detected/undetected
/// events. Repeated observations of the same presence state emit nothing.
#[derive(Debug, Default)]
pub struct FaceTracker {
    present: Option<bool>,
}

impl FaceTracker {
    pub fn observe(&mut self, face: Option<FaceBox>) -> Option<CameraEvent> {
        match face {
            Some(face) if self.present != Some(true) => {
                self.present = Some(true);
                Some(CameraEvent::FaceDetected(face))
            }
            None if self.present != Some(false) => {
                self.present = Some(false);
                Some(CameraEvent::FaceUndetected)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigUpdate;

    #[test]
    fn test_size_bounds() {
        let mut config = CaptureConfig::default();
        config.apply(ConfigUpdate::CaptureMaxSize(0.5)).unwrap();
        config.apply(ConfigUpdate::CaptureMinSize(0.2)).unwrap();

        let small = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        let good = FaceBox::new(0.0, 0.0, 30.0, 30.0);
        let big = FaceBox::new(0.0, 0.0, 60.0, 60.0);

        assert_eq!(evaluate_face(&small, 100, 100, &config), Err(FaceRejection::MinSize));
        assert_eq!(evaluate_face(&good, 100, 100, &config), Ok(()));
        assert_eq!(evaluate_face(&big, 100, 100, &config), Err(FaceRejection::MaxSize));
    }

    #[test]
    fn test_roi_containment() {
        let mut config = CaptureConfig::default();
        config.apply(ConfigUpdate::RoiEnabled(true)).unwrap();
        config.apply(ConfigUpdate::RoiTopOffset(0.1)).unwrap();
        config.apply(ConfigUpdate::RoiLeftOffset(0.1)).unwrap();
        config.apply(ConfigUpdate::RoiRightOffset(0.1)).unwrap();
        config.apply(ConfigUpdate::RoiBottomOffset(0.1)).unwrap();

        let inside = FaceBox::new(20.0, 20.0, 40.0, 40.0);
        let crossing = FaceBox::new(5.0, 20.0, 40.0, 40.0);
        assert_eq!(evaluate_face(&inside, 100, 100, &config), Ok(()));
        assert_eq!(evaluate_face(&crossing, 100, 100, &config), Err(FaceRejection::OutOfRoi));
    }

    #[test]
    fn test_roi_min_size() {
        let mut config = CaptureConfig::default();
        config.apply(ConfigUpdate::RoiEnabled(true)).unwrap();
        config.apply(ConfigUpdate::RoiLeftOffset(0.25)).unwrap();
        config.apply(ConfigUpdate::RoiRightOffset(0.25)).unwrap();
        config.apply(ConfigUpdate::RoiMinSize(0.5)).unwrap();

        // ROI is 50px wide; a 20px face is 40% of it.
        let face = FaceBox::new(30.0, 10.0, 20.0, 20.0);
        assert_eq!(evaluate_face(&face, 100, 100, &config), Err(FaceRejection::RoiMinSize));
        let face = FaceBox::new(30.0, 10.0, 30.0, 30.0);
        assert_eq!(evaluate_face(&face, 100, 100, &config), Ok(()));
    }

    #[test]
    fn test_roi_ignored_when_disabled() {
        let mut config = CaptureConfig::default();
        config.apply(ConfigUpdate::RoiTopOffset(0.4)).unwrap();
        let face = FaceBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(evaluate_face(&face, 100, 100, &config), Ok(()));
    }

    #[test]
    fn test_padded_crop_clamps_to_frame() {
        let face = FaceBox::new(10.0, 10.0, 20.0, 20.0);
        assert_eq!(padded_crop(&face, 0.0, 100, 100), (10, 10, 20, 20));
        assert_eq!(padded_crop(&face, 0.25, 100, 100), (5, 5, 30, 30));
        assert_eq!(padded_crop(&face, 1.0, 40, 40), (0, 0, 40, 40));
    }

    #[test]
    fn test_tracker_alternates() {
        let face = FaceBox::new(1.0, 1.0, 5.0, 5.0);
        let mut tracker = FaceTracker::default();

        assert!(matches!(tracker.observe(None), Some(CameraEvent::FaceUndetected)));
        assert!(tracker.observe(None).is_none());
        assert!(matches!(tracker.observe(Some(face)), Some(CameraEvent::FaceDetected(_))));
        assert!(tracker.observe(Some(face)).is_none());
        assert!(matches!(tracker.observe(None), Some(CameraEvent::FaceUndetected)));
        assert!(tracker.observe(None).is_none());
    }
}
