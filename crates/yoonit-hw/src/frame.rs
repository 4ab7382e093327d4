//! Frame type and image production: YUYV conversion, dark detection,
//! face crops and resized frame images.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use yoonit_core::policy::padded_crop;
use yoonit_core::FaceBox;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    fn to_gray_image(&self) -> Result<GrayImage, FrameError> {
        GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: (self.width * self.height) as usize,
                actual: self.data.len(),
            },
        )
    }

    /// Crop the face (grown by `padding`) and resize it to the output size.
    pub fn face_image(
        &self,
        face: &FaceBox,
        padding: f32,
        out_width: u32,
        out_height: u32,
    ) -> Result<DynamicImage, FrameError> {
        let gray = self.to_gray_image()?;
        let (x, y, w, h) = padded_crop(face, padding, self.width, self.height);
        let crop = imageops::crop_imm(&gray, x, y, w, h).to_image();
        let resized = imageops::resize(&crop, out_width, out_height, FilterType::Triangle);
        Ok(DynamicImage::ImageLuma8(resized))
    }

    /// The whole frame resized to the output size.
    pub fn frame_image(&self, out_width: u32, out_height: u32) -> Result<DynamicImage, FrameError> {
        let gray = self.to_gray_image()?;
        let resized = if gray.dimensions() == (out_width, out_height) {
            gray
        } else {
            imageops::resize(&gray, out_width, out_height, FilterType::Triangle)
        };
        Ok(DynamicImage::ImageLuma8(resized))
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Share of near-black pixels above which a frame counts as dark
/// (lens covered, sensor still warming up).
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// True if more than `threshold_pct` of pixels are in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            data: (0..width * height).map(|i| (i % 256) as u8).collect(),
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        }
    }

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));

        // 94% dark, 6% bright → not dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_default_dark_threshold() {
        // 96% near-black: a covered lens with a little light leaking in.
        let mut gray = vec![5u8; 960];
        gray.extend(vec![200u8; 40]);
        assert!(is_dark_frame(&gray, DARK_FRAME_THRESHOLD));

        let mut dim = vec![5u8; 900];
        dim.extend(vec![90u8; 100]);
        assert!(!is_dark_frame(&dim, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_face_image_has_output_size() {
        let f = frame(64, 48);
        let face = FaceBox::new(10.0, 10.0, 20.0, 20.0);
        let img = f.face_image(&face, 0.1, 32, 40).unwrap();
        assert_eq!((img.width(), img.height()), (32, 40));
    }

    #[test]
    fn test_face_image_at_frame_edge() {
        let f = frame(64, 48);
        let face = FaceBox::new(50.0, 40.0, 30.0, 30.0);
        let img = f.face_image(&face, 0.5, 16, 16).unwrap();
        assert_eq!((img.width(), img.height()), (16, 16));
    }

    #[test]
    fn test_frame_image_resizes() {
        let f = frame(64, 48);
        let img = f.frame_image(32, 24).unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));
        let same = f.frame_image(64, 48).unwrap();
        assert_eq!(same.to_luma8().into_raw(), f.data);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut f = frame(8, 8);
        f.data.truncate(10);
        assert!(f.frame_image(4, 4).is_err());
    }
}
