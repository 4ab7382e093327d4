//! yoonitd: Yoonit camera daemon.
//!
//! The capture engine owns the camera on a dedicated thread and is driven
//! through an [`engine::EngineHandle`]. The daemon binary exports the same
//! surface over D-Bus; hosts that embed the engine use the handle directly.

pub mod config;
pub mod dbus_interface;
pub mod engine;

pub use engine::{spawn_engine, EngineError, EngineHandle, EngineOptions, EngineState};
