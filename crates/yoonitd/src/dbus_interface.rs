use crate::engine::{EngineError, EngineHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use yoonit_core::{
    CameraEventListener, CaptureType, ConfigUpdate, FaceBox, ImageRef, Lens, PermissionGate,
    StatusKind,
};
use yoonit_hw::DevicePermissionStore;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const SERVICE_NAME: &str = "org.yoonit.Camera1";
pub const OBJECT_PATH: &str = "/org/yoonit/Camera1";

/// D-Bus interface for the Yoonit camera daemon.
///
/// Bus name: org.yoonit.Camera1
/// Object path: /org/yoonit/Camera1
pub struct CameraService {
    engine: EngineHandle,
    permission: Arc<PermissionGate<DevicePermissionStore>>,
    signals: Arc<SignalForwarder>,
    backend: &'static str,
}

impl CameraService {
    pub fn new(
        engine: EngineHandle,
        permission: Arc<PermissionGate<DevicePermissionStore>>,
        signals: Arc<SignalForwarder>,
        backend: &'static str,
    ) -> Self {
        Self {
            engine,
            permission,
            signals,
            backend,
        }
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Config(e) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        EngineError::UnsupportedCaptureType(e) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.yoonit.Camera1")]
impl CameraService {
    /// Open the camera without analysis. Returns the resulting state.
    async fn preview(&self) -> zbus::fdo::Result<String> {
        tracing::info!("preview requested");
        let state = self.engine.preview().await.map_err(to_fdo)?;
        Ok(state.as_str().to_string())
    }

    /// Start a capture session: "face", "frame", "qrcode" or "none".
    async fn start_capture(&self, capture_type: &str) -> zbus::fdo::Result<String> {
        tracing::info!(capture_type, "start_capture requested");
        let state = self.engine.start_capture(capture_type).await.map_err(to_fdo)?;
        Ok(state.as_str().to_string())
    }

    async fn stop_capture(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop_capture requested");
        self.engine.stop_capture().await.map_err(to_fdo)?;
        // Reply only after the stopped session's signals are on the bus.
        self.signals.flush().await;
        Ok(())
    }

    /// Switch lens. Returns the new lens id (0 front, 1 back).
    async fn toggle_lens(&self) -> zbus::fdo::Result<u8> {
        let lens = self.engine.toggle_lens().await.map_err(to_fdo)?;
        Ok(lens.id())
    }

    /// Select a lens by name or id.
    async fn set_lens(&self, lens: &str) -> zbus::fdo::Result<u8> {
        let lens: Lens = lens.parse().map_err(zbus::fdo::Error::InvalidArgs)?;
        let lens = self.engine.set_lens(lens).await.map_err(to_fdo)?;
        Ok(lens.id())
    }

    async fn get_lens(&self) -> zbus::fdo::Result<u8> {
        let lens = self.engine.get_lens().await.map_err(to_fdo)?;
        Ok(lens.id())
    }

    /// Apply one capture setting, e.g. ("number-of-images", "5").
    async fn set_option(&self, option: &str, value: &str) -> zbus::fdo::Result<()> {
        let update = ConfigUpdate::parse(option, value)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        self.engine.set(update).await.map_err(to_fdo)
    }

    /// Current capture configuration as JSON.
    async fn config(&self) -> zbus::fdo::Result<String> {
        let config = self.engine.config().await;
        serde_json::to_string(&config).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Resolve camera permission. Denied or restricted is an AccessDenied error.
    async fn request_permission(&self, explanation: &str) -> zbus::fdo::Result<bool> {
        self.permission
            .request_permission(explanation)
            .await
            .map_err(|e| zbus::fdo::Error::AccessDenied(e.to_string()))
    }

    async fn has_permission(&self) -> bool {
        self.permission.has_permission()
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.engine.state().await.map_err(to_fdo)?;
        let lens = self.engine.get_lens().await.map_err(to_fdo)?;
        let capture_type = match state {
            crate::engine::EngineState::Capturing(t) => t.as_str(),
            _ => CaptureType::None.as_str(),
        };
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": self.backend,
            "state": state.as_str(),
            "capture_type": capture_type,
            "lens": lens.as_str(),
            "permission": format!("{:?}", self.permission.state()).to_lowercase(),
        })
        .to_string())
    }

    #[zbus(signal)]
    async fn image_captured(
        emitter: &SignalEmitter<'_>,
        capture_type: &str,
        count: u32,
        total: u32,
        path: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn face_detected(
        emitter: &SignalEmitter<'_>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn face_undetected(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn end_capture(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn barcode_scanned(emitter: &SignalEmitter<'_>, content: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn status_changed(emitter: &SignalEmitter<'_>, kind: &str, text: &str)
        -> zbus::Result<()>;

    #[zbus(signal)]
    async fn permission_denied(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;
}

/// An event on its way to the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusSignal {
    ImageCaptured {
        capture_type: CaptureType,
        count: u32,
        total: u32,
        /// Empty when the image was not saved.
        path: String,
    },
    FaceDetected(FaceBox),
    FaceUndetected,
    EndCapture,
    BarcodeScanned(String),
    Status(StatusKind, String),
    PermissionDenied,
}

enum Queued {
    Signal(BusSignal),
    Flush(oneshot::Sender<()>),
}

/// Event listener that queues every event for [`forward_signals`].
pub struct SignalForwarder {
    tx: mpsc::UnboundedSender<Queued>,
}

impl SignalForwarder {
    pub fn new() -> (Arc<Self>, SignalQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), SignalQueue { rx })
    }

    fn send(&self, signal: BusSignal) {
        let _ = self.tx.send(Queued::Signal(signal));
    }

    /// Resolves once every signal queued before this call has been emitted.
    /// Returns immediately if the queue consumer is gone.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Queued::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Consuming end of a [`SignalForwarder`].
pub struct SignalQueue {
    rx: mpsc::UnboundedReceiver<Queued>,
}

impl SignalQueue {
    /// Next signal to emit, or `None` once the forwarder is dropped.
    ///
    /// A flush is acknowledged when the consumer comes back for the signal
    /// after it, so everything before the flush has been emitted by then.
    pub async fn next(&mut self) -> Option<BusSignal> {
        while let Some(queued) = self.rx.recv().await {
            match queued {
                Queued::Signal(signal) => return Some(signal),
                Queued::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        None
    }
}

impl CameraEventListener for SignalForwarder {
    fn on_image_captured(&self, capture_type: CaptureType, count: u32, total: u32, image: &ImageRef) {
        let path = image
            .path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.send(BusSignal::ImageCaptured {
            capture_type,
            count,
            total,
            path,
        });
    }

    fn on_face_detected(&self, face: FaceBox) {
        self.send(BusSignal::FaceDetected(face));
    }

    fn on_face_undetected(&self) {
        self.send(BusSignal::FaceUndetected);
    }

    fn on_end_capture(&self) {
        self.send(BusSignal::EndCapture);
    }

    fn on_barcode_scanned(&self, content: &str) {
        self.send(BusSignal::BarcodeScanned(content.to_string()));
    }

    fn on_error(&self, error: &str) {
        self.send(BusSignal::Status(StatusKind::Error, error.to_string()));
    }

    fn on_message(&self, message: &str) {
        self.send(BusSignal::Status(StatusKind::Message, message.to_string()));
    }

    fn on_permission_denied(&self) {
        self.send(BusSignal::PermissionDenied);
    }
}

/// Emit queued events as D-Bus signals until the forwarder is dropped.
pub async fn forward_signals(
    connection: zbus::Connection,
    mut queue: SignalQueue,
) -> zbus::Result<()> {
    let emitter = SignalEmitter::new(&connection, OBJECT_PATH)?;
    while let Some(signal) = queue.next().await {
        let result = match &signal {
            BusSignal::ImageCaptured {
                capture_type,
                count,
                total,
                path,
            } => {
                CameraService::image_captured(&emitter, capture_type.as_str(), *count, *total, path)
                    .await
            }
            BusSignal::FaceDetected(face) => {
                CameraService::face_detected(
                    &emitter,
                    face.x as f64,
                    face.y as f64,
                    face.width as f64,
                    face.height as f64,
                )
                .await
            }
            BusSignal::FaceUndetected => CameraService::face_undetected(&emitter).await,
            BusSignal::EndCapture => CameraService::end_capture(&emitter).await,
            BusSignal::BarcodeScanned(content) => {
                CameraService::barcode_scanned(&emitter, content).await
            }
            BusSignal::Status(kind, text) => {
                CameraService::status_changed(&emitter, kind.as_str(), text).await
            }
            BusSignal::PermissionDenied => CameraService::permission_denied(&emitter).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, ?signal, "failed to emit signal");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, EngineOptions};
    use std::time::Duration;
    use yoonit_core::{event_channel, CameraEvent, CaptureConfig, PermissionState};
    use yoonit_hw::{ScriptStep, ScriptedCamera};

    fn service_with(config: CaptureConfig) -> (CameraService, SignalQueue) {
        let (emitter, dispatcher) = event_channel();
        let (forwarder, queue) = SignalForwarder::new();
        dispatcher.registry().subscribe(&forwarder);
        tokio::spawn(dispatcher.run());
        let gate = Arc::new(PermissionGate::new(DevicePermissionStore::new(Vec::new())));
        let camera = ScriptedCamera::new(64, 48)
            .with_steps(vec![ScriptStep::empty()])
            .with_frame_interval(Duration::from_millis(1));
        let options = EngineOptions {
            lens: Lens::Front,
            output_dir: std::env::temp_dir(),
            config,
        };
        let engine = spawn_engine(camera, options, gate.view(), emitter).unwrap();
        (CameraService::new(engine, gate, forwarder, "scripted"), queue)
    }

    fn service() -> CameraService {
        service_with(CaptureConfig::default()).0
    }

    #[tokio::test]
    async fn test_unsupported_capture_type_is_invalid_args() {
        let svc = service();
        let err = svc.start_capture("selfie").await.unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
    }

    #[test]
    fn test_engine_errors_map_to_fdo() {
        let invalid = EngineError::Config(yoonit_core::ConfigError::UnknownOption("zoom".into()));
        assert!(matches!(to_fdo(invalid), zbus::fdo::Error::InvalidArgs(_)));
        assert!(matches!(
            to_fdo(EngineError::ChannelClosed),
            zbus::fdo::Error::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_set_option_validates() {
        let svc = service();
        svc.set_option("number-of-images", "4").await.unwrap();
        let err = svc.set_option("padding_percent", "2.0").await.unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
        assert!(svc.set_option("zoom", "2").await.is_err());

        let config: CaptureConfig = serde_json::from_str(&svc.config().await.unwrap()).unwrap();
        assert_eq!(config.number_of_images, 4);
        assert_eq!(config.padding_percent, 0.0);
    }

    #[tokio::test]
    async fn test_lens_ids() {
        let svc = service();
        assert_eq!(svc.get_lens().await.unwrap(), 0);
        assert_eq!(svc.toggle_lens().await.unwrap(), 1);
        assert_eq!(svc.set_lens("front").await.unwrap(), 0);
        assert!(svc.set_lens("side").await.is_err());
    }

    #[tokio::test]
    async fn test_permission_and_status() {
        let svc = service();
        assert!(!svc.has_permission().await);
        assert!(svc.request_permission("preview").await.unwrap());
        assert!(svc.has_permission().await);
        assert_eq!(svc.permission.state(), PermissionState::Granted);

        assert_eq!(svc.preview().await.unwrap(), "previewing");
        let status: serde_json::Value = serde_json::from_str(&svc.status().await.unwrap()).unwrap();
        assert_eq!(status["state"], "previewing");
        assert_eq!(status["lens"], "front");
        assert_eq!(status["backend"], "scripted");
        assert_eq!(status["permission"], "granted");

        svc.stop_capture().await.unwrap();
    }

    #[tokio::test]
    async fn test_forwarder_maps_events() {
        let (emitter, mut dispatcher) = event_channel();
        let (forwarder, mut queue) = SignalForwarder::new();
        dispatcher.registry().subscribe(&forwarder);

        emitter.emit(CameraEvent::FaceUndetected);
        emitter.emit(CameraEvent::message("INVALID_CAPTURE_FACE_MIN_SIZE"));
        emitter.emit(CameraEvent::BarcodeScanned {
            content: "https://yoonit.dev".into(),
        });
        let image = ImageRef::encode(&image::DynamicImage::new_luma8(2, 2)).unwrap();
        emitter.emit(CameraEvent::ImageCaptured {
            capture_type: CaptureType::Frame,
            count: 1,
            total: 2,
            image,
        });
        assert_eq!(dispatcher.dispatch_pending(), 4);

        assert_eq!(queue.next().await.unwrap(), BusSignal::FaceUndetected);
        assert_eq!(
            queue.next().await.unwrap(),
            BusSignal::Status(StatusKind::Message, "INVALID_CAPTURE_FACE_MIN_SIZE".into())
        );
        assert_eq!(
            queue.next().await.unwrap(),
            BusSignal::BarcodeScanned("https://yoonit.dev".into())
        );
        assert_eq!(
            queue.next().await.unwrap(),
            BusSignal::ImageCaptured {
                capture_type: CaptureType::Frame,
                count: 1,
                total: 2,
                path: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_stop_reply_follows_session_signals() {
        let config = CaptureConfig {
            number_of_images: 0,
            time_between_images: 0,
            output_image_width: 16,
            output_image_height: 16,
            ..CaptureConfig::default()
        };
        let (svc, mut queue) = service_with(config);
        let emitted = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = emitted.clone();
        tokio::spawn(async move {
            while let Some(signal) = queue.next().await {
                sink.lock().unwrap().push(signal);
            }
        });

        assert!(svc.request_permission("frames").await.unwrap());
        assert_eq!(svc.start_capture("frame").await.unwrap(), "capturing");
        tokio::time::sleep(Duration::from_millis(50)).await;
        svc.stop_capture().await.unwrap();

        let emitted = emitted.lock().unwrap().clone();
        assert!(emitted
            .iter()
            .any(|s| matches!(s, BusSignal::ImageCaptured { .. })));
        assert_eq!(emitted.last(), Some(&BusSignal::EndCapture));
    }

    #[tokio::test]
    async fn test_flush_without_consumer_returns() {
        let (forwarder, queue) = SignalForwarder::new();
        drop(queue);
        forwarder.flush().await;
    }
}
