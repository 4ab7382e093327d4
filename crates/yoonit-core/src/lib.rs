//! yoonit-core: Capture contract between a camera engine and an application.
//!
//! Holds the configuration surface, the canonical event taxonomy, the
//! weak-listener event channel and the camera permission gate. Nothing here
//! touches hardware; backends live in `yoonit-hw`.

pub mod config;
pub mod events;
pub mod payload;
pub mod permission;
pub mod policy;
pub mod types;

pub use config::{CaptureConfig, ConfigError, ConfigUpdate, RoiConfig};
pub use events::{event_channel, CameraEventListener, EventDispatcher, EventEmitter, ListenerRegistry};
pub use payload::{ImageError, ImageRef};
pub use permission::{
    MemoryPermissionStore, PermissionError, PermissionGate, PermissionState, PermissionStore,
    PermissionView,
};
pub use policy::{FaceRejection, FaceTracker};
pub use types::{CameraEvent, CaptureType, FaceBox, Lens, StatusKind, UnsupportedCaptureType};
