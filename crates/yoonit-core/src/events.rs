//! Event channel from the capture engine to application listeners.
//!
//! The engine thread only ever enqueues. Listeners are invoked by the
//! [`EventDispatcher`], which the application runs on whatever task or thread
//! it expects callbacks on. Listeners are held weakly: once the owner drops
//! its `Arc`, events for it are skipped, never queued or retried.

use crate::payload::ImageRef;
use crate::types::{CameraEvent, CaptureType, FaceBox, StatusKind};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};

/// Capability set a listener implements to receive camera events.
///
/// Every callback has an empty default so listeners only implement what
/// they care about.
pub trait CameraEventListener: Send + Sync {
    fn on_image_captured(&self, _capture_type: CaptureType, _count: u32, _total: u32, _image: &ImageRef) {}
    fn on_face_detected(&self, _face: FaceBox) {}
    fn on_face_undetected(&self) {}
    fn on_end_capture(&self) {}
    fn on_barcode_scanned(&self, _content: &str) {}
    fn on_error(&self, _error: &str) {}
    fn on_message(&self, _message: &str) {}
    fn on_permission_denied(&self) {}
}

fn deliver(listener: &dyn CameraEventListener, event: &CameraEvent) {
    match event {
        CameraEvent::ImageCaptured {
            capture_type,
            count,
            total,
            image,
        } => listener.on_image_captured(*capture_type, *count, *total, image),
        CameraEvent::FaceDetected(face) => listener.on_face_detected(*face),
        CameraEvent::FaceUndetected => listener.on_face_undetected(),
        CameraEvent::EndCapture => listener.on_end_capture(),
        CameraEvent::BarcodeScanned { content } => listener.on_barcode_scanned(content),
        CameraEvent::Status {
            kind: StatusKind::Error,
            text,
        } => listener.on_error(text),
        CameraEvent::Status {
            kind: StatusKind::Message,
            text,
        } => listener.on_message(text),
        CameraEvent::PermissionDenied => listener.on_permission_denied(),
    }
}

enum Envelope {
    Event(CameraEvent),
    Flush(oneshot::Sender<()>),
}

/// Sending half, owned by the engine. Cheap to clone.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventEmitter {
    /// Enqueue an event. Dropped silently if the dispatcher is gone.
    pub fn emit(&self, event: CameraEvent) {
        let name = event.name();
        if self.tx.send(Envelope::Event(event)).is_err() {
            tracing::trace!(event = name, "dispatcher gone; event dropped");
        }
    }

    /// Resolves once the dispatcher has delivered every event enqueued
    /// before this call. Returns immediately if the dispatcher is gone.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Shared set of weakly held listeners.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<Mutex<Vec<Weak<dyn CameraEventListener>>>>,
}

impl ListenerRegistry {
    /// Register a listener. The registry never keeps it alive.
    pub fn subscribe<L: CameraEventListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Arc<dyn CameraEventListener> = listener.clone();
        let weak = Arc::downgrade(&listener);
        self.lock().push(weak);
    }

    pub fn unsubscribe<L: CameraEventListener + 'static>(&self, listener: &Arc<L>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.lock()
            .retain(|w| w.as_ptr() as *const () != target);
    }

    /// Number of listeners still alive.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deliver(&self, event: &CameraEvent) {
        let live: Vec<Arc<dyn CameraEventListener>> = {
            let mut listeners = self.lock();
            let before = listeners.len();
            listeners.retain(|w| w.strong_count() > 0);
            if listeners.len() < before {
                tracing::trace!(dropped = before - listeners.len(), "pruned unreachable listeners");
            }
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in live {
            deliver(listener.as_ref(), event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Weak<dyn CameraEventListener>>> {
        // A listener panicking mid-delivery poisons nothing we rely on.
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Receiving half. Runs on the application's listener context.
pub struct EventDispatcher {
    rx: mpsc::UnboundedReceiver<Envelope>,
    listeners: ListenerRegistry,
}

impl EventDispatcher {
    pub fn registry(&self) -> ListenerRegistry {
        self.listeners.clone()
    }

    /// Deliver events until every emitter is dropped.
    pub async fn run(mut self) {
        while let Some(envelope) = self.rx.recv().await {
            self.handle(envelope);
        }
        tracing::debug!("event dispatcher stopped");
    }

    /// Deliver whatever is queued right now, without waiting.
    ///
    /// For hosts that pump events from their own loop instead of spawning
    /// [`run`](Self::run). Returns the number of events delivered.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            if matches!(envelope, Envelope::Event(_)) {
                delivered += 1;
            }
            self.handle(envelope);
        }
        delivered
    }

    fn handle(&self, envelope: Envelope) {
        match envelope {
            Envelope::Event(event) => {
                tracing::trace!(event = event.name(), "dispatching");
                self.listeners.deliver(&event);
            }
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Create a connected emitter/dispatcher pair.
pub fn event_channel() -> (EventEmitter, EventDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventEmitter { tx },
        EventDispatcher {
            rx,
            listeners: ListenerRegistry::default(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }

        fn push(&self, s: impl Into<String>) {
            self.seen.lock().unwrap().push(s.into());
        }
    }

    impl CameraEventListener for Recorder {
        fn on_face_detected(&self, face: FaceBox) {
            self.push(format!("face {}", face.width));
        }
        fn on_face_undetected(&self) {
            self.push("undetected");
        }
        fn on_end_capture(&self) {
            self.push("end");
        }
        fn on_barcode_scanned(&self, content: &str) {
            self.push(format!("barcode {content}"));
        }
        fn on_error(&self, error: &str) {
            self.push(format!("error {error}"));
        }
        fn on_message(&self, message: &str) {
            self.push(format!("message {message}"));
        }
    }

    #[test]
    fn test_delivers_in_order() {
        let (emitter, mut dispatcher) = event_channel();
        let recorder = Arc::new(Recorder::default());
        dispatcher.registry().subscribe(&recorder);

        emitter.emit(CameraEvent::FaceDetected(FaceBox::new(0.0, 0.0, 4.0, 4.0)));
        emitter.emit(CameraEvent::FaceUndetected);
        emitter.emit(CameraEvent::BarcodeScanned { content: "abc".into() });
        emitter.emit(CameraEvent::error("lost"));
        emitter.emit(CameraEvent::message("hint"));
        emitter.emit(CameraEvent::EndCapture);

        assert_eq!(dispatcher.dispatch_pending(), 6);
        assert_eq!(
            recorder.seen(),
            vec!["face 4", "undetected", "barcode abc", "error lost", "message hint", "end"]
        );
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let (emitter, mut dispatcher) = event_channel();
        let registry = dispatcher.registry();
        let kept = Arc::new(Recorder::default());
        let gone = Arc::new(Recorder::default());
        registry.subscribe(&kept);
        registry.subscribe(&gone);
        assert_eq!(registry.len(), 2);

        drop(gone);
        emitter.emit(CameraEvent::EndCapture);
        dispatcher.dispatch_pending();

        assert_eq!(kept.seen(), vec!["end"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_no_listener_drops_events() {
        let (emitter, mut dispatcher) = event_channel();
        emitter.emit(CameraEvent::PermissionDenied);
        assert_eq!(dispatcher.dispatch_pending(), 1);
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let (emitter, mut dispatcher) = event_channel();
        let recorder = Arc::new(Recorder::default());
        let registry = dispatcher.registry();
        registry.subscribe(&recorder);
        registry.unsubscribe(&recorder);

        emitter.emit(CameraEvent::EndCapture);
        dispatcher.dispatch_pending();
        assert!(recorder.seen().is_empty());
    }

    #[test]
    fn test_emit_after_dispatcher_dropped() {
        let (emitter, dispatcher) = event_channel();
        drop(dispatcher);
        emitter.emit(CameraEvent::EndCapture);
    }

    #[tokio::test]
    async fn test_flush_waits_for_delivery() {
        let (emitter, dispatcher) = event_channel();
        let recorder = Arc::new(Recorder::default());
        dispatcher.registry().subscribe(&recorder);
        let task = tokio::spawn(dispatcher.run());

        emitter.emit(CameraEvent::FaceUndetected);
        emitter.emit(CameraEvent::EndCapture);
        emitter.flush().await;
        assert_eq!(recorder.seen(), vec!["undetected", "end"]);

        drop(emitter);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_without_dispatcher_returns() {
        let (emitter, dispatcher) = event_channel();
        drop(dispatcher);
        emitter.flush().await;
    }
}
