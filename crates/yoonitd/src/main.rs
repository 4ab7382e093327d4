use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use yoonit_core::{event_channel, PermissionGate};
use yoonit_hw::{DevicePermissionStore, ScriptedCamera, V4l2Camera};

use yoonitd::config::{Backend, BusKind, Config};
use yoonitd::dbus_interface::{
    forward_signals, CameraService, SignalForwarder, OBJECT_PATH, SERVICE_NAME,
};
use yoonitd::{spawn_engine, EngineOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        backend = ?config.backend,
        front = %config.front_device,
        back = %config.back_device,
        bus = ?config.bus,
        "yoonitd starting"
    );
    let capture_config = config.capture_config()?;

    let (emitter, dispatcher) = event_channel();
    let (forwarder, signals) = SignalForwarder::new();
    dispatcher.registry().subscribe(&forwarder);
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let options = EngineOptions {
        lens: config.initial_lens,
        output_dir: config.output_dir.clone(),
        config: capture_config,
    };

    let (engine, permission, backend) = match config.backend {
        Backend::V4l2 => {
            let store = DevicePermissionStore::new(vec![
                config.front_device.clone(),
                config.back_device.clone(),
            ]);
            let permission = Arc::new(PermissionGate::new(store));
            let camera = V4l2Camera::new(config.front_device.clone(), config.back_device.clone());
            let engine = spawn_engine(camera, options, permission.view(), emitter)?;
            (engine, permission, "v4l2")
        }
        Backend::Scripted => {
            // Synthetic frames need no device node.
            let permission = Arc::new(PermissionGate::new(DevicePermissionStore::new(Vec::new())));
            let engine = spawn_engine(ScriptedCamera::demo(), options, permission.view(), emitter)?;
            (engine, permission, "scripted")
        }
    };

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let service = CameraService::new(engine.clone(), permission, forwarder.clone(), backend);
    let connection = builder
        .name(SERVICE_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;
    let signal_task = tokio::spawn(forward_signals(connection.clone(), signals));

    tracing::info!(service = SERVICE_NAME, path = OBJECT_PATH, "yoonitd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("yoonitd shutting down");

    engine.stop_capture().await?;
    drop(forwarder);
    signal_task.abort();
    dispatcher_task.abort();

    Ok(())
}
