//! Scripted camera backend.
//!
//! Plays back a fixed sequence of detections over synthetic frames. Used by
//! the daemon's demo mode and by engine tests. A [`ScriptProbe`] exposes
//! what the engine did to the device (opens, lens, applied config).

use crate::device::{CameraDevice, DeviceCapabilities, DeviceError, Sample};
use crate::frame::Frame;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use yoonit_core::{CaptureConfig, FaceBox, Lens};

/// Detections reported for one frame.
#[derive(Debug, Clone, Default)]
pub struct ScriptStep {
    pub faces: Vec<FaceBox>,
    pub barcodes: Vec<String>,
}

impl ScriptStep {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn face(face: FaceBox) -> Self {
        Self {
            faces: vec![face],
            barcodes: Vec::new(),
        }
    }

    pub fn barcode(content: impl Into<String>) -> Self {
        Self {
            faces: Vec::new(),
            barcodes: vec![content.into()],
        }
    }
}

#[derive(Default)]
struct ProbeState {
    opens: AtomicUsize,
    open_handles: AtomicUsize,
    max_open_handles: AtomicUsize,
    lens: Mutex<Option<Lens>>,
    applied: Mutex<Vec<CaptureConfig>>,
}

/// Observation handle shared with a [`ScriptedCamera`].
#[derive(Clone, Default)]
pub struct ScriptProbe {
    state: Arc<ProbeState>,
}

impl ScriptProbe {
    /// Successful `open` calls so far.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.state.open_handles.load(Ordering::SeqCst) > 0
    }

    /// Highest number of simultaneously open handles ever seen.
    pub fn max_open_handles(&self) -> usize {
        self.state.max_open_handles.load(Ordering::SeqCst)
    }

    /// Lens of the currently open handle.
    pub fn lens(&self) -> Option<Lens> {
        *self.state.lens.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every config the engine pushed to the device, oldest first.
    pub fn applied_configs(&self) -> Vec<CaptureConfig> {
        self.state
            .applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub struct ScriptedCamera {
    steps: Vec<ScriptStep>,
    cursor: usize,
    looping: bool,
    width: u32,
    height: u32,
    frame_interval: Duration,
    sequence: u32,
    lens: Option<Lens>,
    failing_lens: Option<Lens>,
    capabilities: DeviceCapabilities,
    probe: ScriptProbe,
}

impl ScriptedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            steps: Vec::new(),
            cursor: 0,
            looping: false,
            width,
            height,
            frame_interval: Duration::from_millis(2),
            sequence: 0,
            lens: None,
            failing_lens: None,
            capabilities: DeviceCapabilities {
                face_detection: true,
                barcode_decoding: true,
            },
            probe: ScriptProbe::default(),
        }
    }

    /// Steps played in order. After the last one, the last step repeats
    /// unless looping is enabled.
    pub fn with_steps(mut self, steps: Vec<ScriptStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make `open` fail for the given lens.
    pub fn failing_on(mut self, lens: Lens) -> Self {
        self.failing_lens = Some(lens);
        self
    }

    pub fn probe(&self) -> ScriptProbe {
        self.probe.clone()
    }

    /// A face that comes and goes, then a barcode, forever.
    pub fn demo() -> Self {
        let face = FaceBox::new(220.0, 120.0, 200.0, 220.0);
        let mut steps = Vec::new();
        steps.extend(std::iter::repeat(ScriptStep::empty()).take(15));
        steps.extend(std::iter::repeat(ScriptStep::face(face)).take(60));
        steps.extend(std::iter::repeat(ScriptStep::empty()).take(15));
        steps.extend(std::iter::repeat(ScriptStep::barcode("https://yoonit.dev")).take(5));
        Self::new(640, 480)
            .with_steps(steps)
            .looping(true)
            .with_frame_interval(Duration::from_millis(33))
    }

    fn current_step(&mut self) -> ScriptStep {
        if self.steps.is_empty() {
            return ScriptStep::empty();
        }
        let step = self.steps[self.cursor].clone();
        if self.cursor + 1 < self.steps.len() {
            self.cursor += 1;
        } else if self.looping {
            self.cursor = 0;
        }
        step
    }

    /// Mid-gray background with every face drawn brighter.
    fn render(&self, faces: &[FaceBox]) -> Vec<u8> {
        let mut data = vec![96u8; (self.width * self.height) as usize];
        for face in faces {
            let x0 = face.x.max(0.0) as u32;
            let y0 = face.y.max(0.0) as u32;
            let x1 = (face.right().max(0.0) as u32).min(self.width);
            let y1 = (face.bottom().max(0.0) as u32).min(self.height);
            for y in y0..y1 {
                for x in x0..x1 {
                    data[(y * self.width + x) as usize] = 200;
                }
            }
        }
        data
    }
}

impl CameraDevice for ScriptedCamera {
    fn open(&mut self, lens: Lens) -> Result<(), DeviceError> {
        if self.lens.is_some() {
            return Err(DeviceError::DeviceBusy);
        }
        if self.failing_lens == Some(lens) {
            return Err(DeviceError::DeviceNotFound(format!("scripted {lens} camera")));
        }

        let state = &self.probe.state;
        let handles = state.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_open_handles.fetch_max(handles, Ordering::SeqCst);
        state.opens.fetch_add(1, Ordering::SeqCst);
        *state.lens.lock().unwrap_or_else(|e| e.into_inner()) = Some(lens);

        self.lens = Some(lens);
        self.cursor = 0;
        tracing::debug!(%lens, "scripted camera opened");
        Ok(())
    }

    fn close(&mut self) {
        if self.lens.take().is_some() {
            let state = &self.probe.state;
            state.open_handles.fetch_sub(1, Ordering::SeqCst);
            *state.lens.lock().unwrap_or_else(|e| e.into_inner()) = None;
            tracing::debug!("scripted camera closed");
        }
    }

    fn is_open(&self) -> bool {
        self.lens.is_some()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn apply_config(&mut self, config: &CaptureConfig) {
        self.probe
            .state
            .applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(config.clone());
    }

    fn next_sample(&mut self) -> Result<Sample, DeviceError> {
        if self.lens.is_none() {
            return Err(DeviceError::NotOpen);
        }
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }

        let step = self.current_step();
        self.sequence = self.sequence.wrapping_add(1);
        let data = self.render(&step.faces);

        Ok(Sample {
            frame: Frame {
                data,
                width: self.width,
                height: self.height,
                timestamp: std::time::Instant::now(),
                sequence: self.sequence,
                is_dark: false,
            },
            faces: if self.capabilities.face_detection { step.faces } else { Vec::new() },
            barcodes: if self.capabilities.barcode_decoding { step.barcodes } else { Vec::new() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cam(steps: Vec<ScriptStep>) -> ScriptedCamera {
        ScriptedCamera::new(32, 24)
            .with_steps(steps)
            .with_frame_interval(Duration::ZERO)
    }

    #[test]
    fn test_plays_steps_then_repeats_last() {
        let face = FaceBox::new(4.0, 4.0, 8.0, 8.0);
        let mut camera = cam(vec![ScriptStep::empty(), ScriptStep::face(face)]);
        camera.open(Lens::Front).unwrap();

        assert!(camera.next_sample().unwrap().faces.is_empty());
        assert_eq!(camera.next_sample().unwrap().faces, vec![face]);
        assert_eq!(camera.next_sample().unwrap().faces, vec![face]);
    }

    #[test]
    fn test_looping() {
        let mut camera = cam(vec![ScriptStep::barcode("a"), ScriptStep::barcode("b")]).looping(true);
        camera.open(Lens::Back).unwrap();
        let seen: Vec<String> = (0..4)
            .map(|_| camera.next_sample().unwrap().barcodes[0].clone())
            .collect();
        assert_eq!(seen, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_double_open_is_busy() {
        let mut camera = cam(Vec::new());
        let probe = camera.probe();
        camera.open(Lens::Front).unwrap();
        assert!(matches!(camera.open(Lens::Back), Err(DeviceError::DeviceBusy)));
        assert_eq!(probe.lens(), Some(Lens::Front));

        camera.close();
        camera.close();
        assert!(!probe.is_open());
        camera.open(Lens::Back).unwrap();
        assert_eq!(probe.opens(), 2);
        assert_eq!(probe.max_open_handles(), 1);
    }

    #[test]
    fn test_failing_lens() {
        let mut camera = cam(Vec::new()).failing_on(Lens::Back);
        assert!(camera.open(Lens::Back).is_err());
        assert!(!camera.is_open());
        camera.open(Lens::Front).unwrap();
    }

    #[test]
    fn test_face_is_rendered_bright() {
        let mut camera = cam(vec![ScriptStep::face(FaceBox::new(2.0, 2.0, 4.0, 4.0))]);
        camera.open(Lens::Front).unwrap();
        let sample = camera.next_sample().unwrap();
        assert_eq!(sample.frame.data[3 * 32 + 3], 200);
        assert_eq!(sample.frame.data[0], 96);
    }

    #[test]
    fn test_capabilities_hide_detections() {
        let mut camera = cam(vec![ScriptStep::face(FaceBox::new(2.0, 2.0, 4.0, 4.0))])
            .with_capabilities(DeviceCapabilities {
                face_detection: false,
                barcode_decoding: false,
            });
        camera.open(Lens::Front).unwrap();
        assert!(camera.next_sample().unwrap().faces.is_empty());
    }
}
