use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Mutex};
use yoonit_core::permission::PermissionView;
use yoonit_core::policy::{evaluate_face, FaceRejection, FaceTracker};
use yoonit_core::{
    CameraEvent, CaptureConfig, CaptureType, ConfigError, ConfigUpdate, EventEmitter, ImageRef,
    Lens, UnsupportedCaptureType,
};
use yoonit_hw::frame::FrameError;
use yoonit_hw::{CameraDevice, Sample};

/// Consecutive sample failures tolerated before the camera is released.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const FAILURE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    UnsupportedCaptureType(#[from] UnsupportedCaptureType),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Capture session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Previewing,
    Capturing(CaptureType),
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Previewing => "previewing",
            EngineState::Capturing(_) => "capturing",
        }
    }
}

/// Startup parameters for the engine thread.
pub struct EngineOptions {
    pub lens: Lens,
    /// Where captured images are written when `save_image` is on.
    pub output_dir: PathBuf,
    pub config: CaptureConfig,
}

/// Messages sent from handles to the engine thread.
enum EngineRequest {
    Preview {
        reply: oneshot::Sender<EngineState>,
    },
    StartCapture {
        capture_type: CaptureType,
        reply: oneshot::Sender<EngineState>,
    },
    StopCapture {
        reply: oneshot::Sender<()>,
    },
    SetLens {
        /// `None` toggles.
        lens: Option<Lens>,
        reply: oneshot::Sender<Lens>,
    },
    GetLens {
        reply: oneshot::Sender<Lens>,
    },
    ApplyConfig {
        config: CaptureConfig,
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<EngineState>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Configuration is validated here, before anything reaches the engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    config: Arc<Mutex<CaptureConfig>>,
    events: EventEmitter,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Open the camera without analysis.
    pub async fn preview(&self) -> Result<EngineState, EngineError> {
        self.request(|reply| EngineRequest::Preview { reply }).await
    }

    /// Parse `capture_type` and start capturing.
    pub async fn start_capture(&self, capture_type: &str) -> Result<EngineState, EngineError> {
        let capture_type: CaptureType = capture_type.parse()?;
        self.start(capture_type).await
    }

    pub async fn start(&self, capture_type: CaptureType) -> Result<EngineState, EngineError> {
        self.request(|reply| EngineRequest::StartCapture {
            capture_type,
            reply,
        })
        .await
    }

    /// Stop capturing and release the camera.
    ///
    /// Returns once every event of the stopped session has been delivered;
    /// nothing from that session reaches listeners afterwards.
    pub async fn stop_capture(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StopCapture { reply }).await?;
        self.events.flush().await;
        Ok(())
    }

    pub async fn toggle_lens(&self) -> Result<Lens, EngineError> {
        self.request(|reply| EngineRequest::SetLens { lens: None, reply })
            .await
    }

    pub async fn set_lens(&self, lens: Lens) -> Result<Lens, EngineError> {
        self.request(|reply| EngineRequest::SetLens {
            lens: Some(lens),
            reply,
        })
        .await
    }

    pub async fn get_lens(&self) -> Result<Lens, EngineError> {
        self.request(|reply| EngineRequest::GetLens { reply }).await
    }

    pub async fn state(&self) -> Result<EngineState, EngineError> {
        self.request(|reply| EngineRequest::State { reply }).await
    }

    /// Current configuration.
    pub async fn config(&self) -> CaptureConfig {
        self.config.lock().await.clone()
    }

    /// Apply one setter. Rejected values never reach the engine.
    pub async fn set(&self, update: ConfigUpdate) -> Result<(), EngineError> {
        let mut config = self.config.lock().await;
        config.apply(update)?;
        tracing::debug!(field = update.field(), ?update, "config updated");
        let snapshot = config.clone();
        // Hold the lock until the engine has the snapshot so updates land in order.
        self.request(|reply| EngineRequest::ApplyConfig {
            config: snapshot,
            reply,
        })
        .await
    }

    /// Replace the whole configuration.
    pub async fn configure(&self, next: CaptureConfig) -> Result<(), EngineError> {
        next.validate()?;
        let mut config = self.config.lock().await;
        *config = next.clone();
        self.request(|reply| EngineRequest::ApplyConfig {
            config: next,
            reply,
        })
        .await
    }

    pub async fn set_number_of_images(&self, n: u32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::NumberOfImages(n)).await
    }

    pub async fn set_time_between_images(&self, ms: u64) -> Result<(), EngineError> {
        self.set(ConfigUpdate::TimeBetweenImages(ms)).await
    }

    pub async fn set_padding_percent(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::PaddingPercent(v)).await
    }

    pub async fn set_output_image_width(&self, px: u32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::OutputImageWidth(px)).await
    }

    pub async fn set_output_image_height(&self, px: u32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::OutputImageHeight(px)).await
    }

    pub async fn set_capture_min_size(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::CaptureMinSize(v)).await
    }

    pub async fn set_capture_max_size(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::CaptureMaxSize(v)).await
    }

    pub async fn set_detection_box(&self, on: bool) -> Result<(), EngineError> {
        self.set(ConfigUpdate::DetectionBox(on)).await
    }

    pub async fn set_save_image(&self, on: bool) -> Result<(), EngineError> {
        self.set(ConfigUpdate::SaveImage(on)).await
    }

    pub async fn set_roi_enabled(&self, on: bool) -> Result<(), EngineError> {
        self.set(ConfigUpdate::RoiEnabled(on)).await
    }

    pub async fn set_roi_top_offset(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::RoiTopOffset(v)).await
    }

    pub async fn set_roi_right_offset(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::RoiRightOffset(v)).await
    }

    pub async fn set_roi_bottom_offset(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::RoiBottomOffset(v)).await
    }

    pub async fn set_roi_left_offset(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::RoiLeftOffset(v)).await
    }

    pub async fn set_roi_min_size(&self, v: f32) -> Result<(), EngineError> {
        self.set(ConfigUpdate::RoiMinSize(v)).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the camera and serializes every lifecycle and config
/// request. It exits, releasing the camera, once all handles are dropped.
pub fn spawn_engine<D: CameraDevice + 'static>(
    mut device: D,
    options: EngineOptions,
    permission: PermissionView,
    events: EventEmitter,
) -> Result<EngineHandle, EngineError> {
    options.config.validate()?;
    device.apply_config(&options.config);

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let handle = EngineHandle {
        tx,
        config: Arc::new(Mutex::new(options.config.clone())),
        events: events.clone(),
    };

    let capabilities = device.capabilities();
    tracing::info!(
        lens = %options.lens,
        output_dir = %options.output_dir.display(),
        face_detection = capabilities.face_detection,
        barcode_decoding = capabilities.barcode_decoding,
        "starting capture engine"
    );

    let mut engine = Engine {
        device,
        events,
        permission,
        config: options.config,
        lens: options.lens,
        output_dir: options.output_dir,
        state: EngineState::Idle,
        session: None,
        sessions_started: 0,
        consecutive_failures: 0,
    };

    std::thread::Builder::new()
        .name("yoonit-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            loop {
                let request = if engine.is_streaming() {
                    match rx.try_recv() {
                        Ok(req) => Some(req),
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Disconnected) => break,
                    }
                } else {
                    match rx.blocking_recv() {
                        Some(req) => Some(req),
                        None => break,
                    }
                };

                match request {
                    Some(req) => engine.handle(req),
                    None => engine.step(),
                }
            }
            engine.shutdown();
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(handle)
}

struct Session {
    id: u64,
    capture_type: CaptureType,
    count: u32,
    total: u32,
    ended: bool,
    last_image_at: Option<Instant>,
    tracker: FaceTracker,
    last_rejection: Option<FaceRejection>,
    last_barcode: Option<String>,
}

impl Session {
    fn new(id: u64, capture_type: CaptureType, total: u32) -> Self {
        Self {
            id,
            capture_type,
            count: 0,
            total,
            ended: false,
            last_image_at: None,
            tracker: FaceTracker::default(),
            last_rejection: None,
            last_barcode: None,
        }
    }

    fn image_due(&self, now: Instant, time_between: Duration) -> bool {
        if self.ended || (self.total != 0 && self.count >= self.total) {
            return false;
        }
        match self.last_image_at {
            None => true,
            Some(last) => now.duration_since(last) >= time_between,
        }
    }
}

struct Engine<D> {
    device: D,
    events: EventEmitter,
    permission: PermissionView,
    config: CaptureConfig,
    lens: Lens,
    output_dir: PathBuf,
    state: EngineState,
    session: Option<Session>,
    sessions_started: u64,
    consecutive_failures: u32,
}

impl<D: CameraDevice> Engine<D> {
    fn is_streaming(&self) -> bool {
        self.state != EngineState::Idle
    }

    fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Preview { reply } => {
                if self.state == EngineState::Idle && self.open_camera() {
                    self.state = EngineState::Previewing;
                    tracing::info!(lens = %self.lens, "preview started");
                }
                let _ = reply.send(self.state);
            }
            EngineRequest::StartCapture {
                capture_type,
                reply,
            } => {
                self.start_capture(capture_type);
                let _ = reply.send(self.state);
            }
            EngineRequest::StopCapture { reply } => {
                self.stop_capture();
                let _ = reply.send(());
            }
            EngineRequest::SetLens { lens, reply } => {
                let target = lens.unwrap_or_else(|| self.lens.toggled());
                self.switch_lens(target);
                let _ = reply.send(self.lens);
            }
            EngineRequest::GetLens { reply } => {
                let _ = reply.send(self.lens);
            }
            EngineRequest::ApplyConfig { config, reply } => {
                self.device.apply_config(&config);
                self.config = config;
                let _ = reply.send(());
            }
            EngineRequest::State { reply } => {
                let _ = reply.send(self.state);
            }
        }
    }

    /// Open the camera if needed. On failure the camera is left closed,
    /// the state is Idle and the failure was reported as an event.
    fn open_camera(&mut self) -> bool {
        if self.device.is_open() {
            return true;
        }
        if !self.permission.is_granted() {
            tracing::warn!(state = ?self.permission.state(), "camera permission not granted");
            self.end_session();
            self.state = EngineState::Idle;
            self.events.emit(CameraEvent::PermissionDenied);
            return false;
        }
        match self.device.open(self.lens) {
            Ok(()) => {
                self.consecutive_failures = 0;
                true
            }
            Err(e) => {
                tracing::error!(lens = %self.lens, error = %e, "failed to open camera");
                self.device.close();
                self.end_session();
                self.state = EngineState::Idle;
                self.events.emit(CameraEvent::error(e.to_string()));
                false
            }
        }
    }

    fn start_capture(&mut self, capture_type: CaptureType) {
        if !self.device.capabilities().supports(capture_type) {
            tracing::warn!(%capture_type, "capture type not supported by camera backend");
            self.events.emit(CameraEvent::error(format!(
                "capture type {capture_type} is not supported by this camera"
            )));
            return;
        }

        self.end_session();
        if !self.open_camera() {
            return;
        }

        if capture_type == CaptureType::None {
            self.state = EngineState::Previewing;
            tracing::info!("capture cleared; previewing");
            return;
        }

        self.sessions_started += 1;
        let session = Session::new(self.sessions_started, capture_type, self.config.number_of_images);
        tracing::info!(
            session = session.id,
            %capture_type,
            total = session.total,
            lens = %self.lens,
            "capture started"
        );
        self.session = Some(session);
        self.state = EngineState::Capturing(capture_type);
    }

    fn stop_capture(&mut self) {
        if self.state == EngineState::Idle {
            return;
        }
        self.end_session();
        self.device.close();
        self.state = EngineState::Idle;
        tracing::info!("capture stopped");
    }

    /// Close the old handle before opening the new one.
    fn switch_lens(&mut self, lens: Lens) {
        if lens == self.lens {
            return;
        }
        let previous = self.lens;
        self.lens = lens;
        if !self.device.is_open() {
            tracing::info!(%previous, %lens, "lens set");
            return;
        }

        self.device.close();
        if self.open_camera() {
            tracing::info!(%previous, %lens, "lens switched");
        }
    }

    /// Drop the current session, emitting its `EndCapture` if still owed.
    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            if session.capture_type.produces_images() && !session.ended {
                self.events.emit(CameraEvent::EndCapture);
            }
            tracing::debug!(session = session.id, images = session.count, "session ended");
        }
    }

    fn shutdown(&mut self) {
        self.end_session();
        self.device.close();
        self.state = EngineState::Idle;
    }

    /// Pull one sample and run the active pipeline on it.
    fn step(&mut self) {
        let sample = match self.device.next_sample() {
            Ok(sample) => {
                self.consecutive_failures = 0;
                sample
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(error = %e, failures = self.consecutive_failures, "sample failed");
                self.events.emit(CameraEvent::error(e.to_string()));
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!("too many consecutive failures; releasing camera");
                    self.stop_capture();
                } else {
                    std::thread::sleep(FAILURE_BACKOFF);
                }
                return;
            }
        };

        if sample.frame.is_dark {
            tracing::trace!(sequence = sample.frame.sequence, "dark frame skipped");
            return;
        }

        match self.state {
            EngineState::Capturing(CaptureType::Face) => self.process_face(&sample),
            EngineState::Capturing(CaptureType::Frame) => self.process_frame(&sample),
            EngineState::Capturing(CaptureType::Qrcode) => self.process_barcodes(&sample),
            _ => {}
        }
    }

    fn process_face(&mut self, sample: &Sample) {
        let frame = &sample.frame;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let accepted = match sample.faces.first() {
            Some(face) => match evaluate_face(face, frame.width, frame.height, &self.config) {
                Ok(()) => {
                    session.last_rejection = None;
                    Some(*face)
                }
                Err(rejection) => {
                    if session.last_rejection != Some(rejection) {
                        session.last_rejection = Some(rejection);
                        self.events.emit(CameraEvent::message(rejection.code()));
                    }
                    None
                }
            },
            None => {
                session.last_rejection = None;
                None
            }
        };

        if let Some(event) = session.tracker.observe(accepted) {
            self.events.emit(event);
        }

        let time_between = Duration::from_millis(self.config.time_between_images);
        let Some(face) = accepted else {
            return;
        };
        if !session.image_due(Instant::now(), time_between) {
            return;
        }

        let image = frame.face_image(
            &face,
            self.config.padding_percent,
            self.config.output_image_width,
            self.config.output_image_height,
        );
        self.emit_image(image);
    }

    fn process_frame(&mut self, sample: &Sample) {
        let time_between = Duration::from_millis(self.config.time_between_images);
        let due = self
            .session
            .as_ref()
            .is_some_and(|s| s.image_due(Instant::now(), time_between));
        if !due {
            return;
        }
        let image = sample
            .frame
            .frame_image(self.config.output_image_width, self.config.output_image_height);
        self.emit_image(image);
    }

    fn process_barcodes(&mut self, sample: &Sample) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if sample.barcodes.is_empty() {
            session.last_barcode = None;
            return;
        }
        for content in &sample.barcodes {
            if session.last_barcode.as_deref() == Some(content.as_str()) {
                continue;
            }
            tracing::debug!(content = %content, "barcode scanned");
            session.last_barcode = Some(content.clone());
            self.events.emit(CameraEvent::BarcodeScanned {
                content: content.clone(),
            });
        }
    }

    /// Count, encode, optionally save and emit one captured image.
    fn emit_image(&mut self, image: Result<image::DynamicImage, FrameError>) {
        let encoded = image
            .map_err(|e| e.to_string())
            .and_then(|img| ImageRef::encode(&img).map_err(|e| e.to_string()));
        let mut image_ref = match encoded {
            Ok(image_ref) => image_ref,
            Err(e) => {
                tracing::warn!(error = %e, "image encoding failed");
                self.events.emit(CameraEvent::error(e));
                return;
            }
        };

        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.count += 1;
        session.last_image_at = Some(Instant::now());
        let (count, total, capture_type) = (session.count, session.total, session.capture_type);

        if self.config.save_image {
            let file_name = format!(
                "yoonit-{capture_type}-{}-{}-{count}.png",
                chrono::Local::now().format("%Y%m%dT%H%M%S"),
                session.id
            );
            match image_ref.clone().persist(&self.output_dir, &file_name) {
                Ok(saved) => image_ref = saved,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to save captured image");
                    self.events.emit(CameraEvent::error(format!("failed to save image: {e}")));
                }
            }
        }

        tracing::debug!(%capture_type, count, total, "image captured");
        self.events.emit(CameraEvent::ImageCaptured {
            capture_type,
            count,
            total,
            image: image_ref,
        });

        if total != 0 && count >= total {
            session.ended = true;
            tracing::info!(session = session.id, images = count, "capture complete");
            self.events.emit(CameraEvent::EndCapture);
        }
    }
}
