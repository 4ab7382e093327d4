//! yoonit-hw: Camera backends for the Yoonit capture engine.
//!
//! Provides the `CameraDevice` abstraction, a V4L2 backend, a scripted
//! backend for demos and tests, and device-node permission checks.

pub mod device;
pub mod frame;
pub mod permission;
pub mod scripted;
pub mod v4l2;

pub use device::{CameraDevice, DeviceCapabilities, DeviceError, Sample};
pub use frame::Frame;
pub use permission::DevicePermissionStore;
pub use scripted::{ScriptProbe, ScriptStep, ScriptedCamera};
pub use v4l2::V4l2Camera;
