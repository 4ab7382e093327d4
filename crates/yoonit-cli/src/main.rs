use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::Path;
use yoonit_core::{ImageRef, Lens};

#[zbus::proxy(
    interface = "org.yoonit.Camera1",
    default_service = "org.yoonit.Camera1",
    default_path = "/org/yoonit/Camera1"
)]
trait Camera {
    async fn preview(&self) -> zbus::Result<String>;
    async fn start_capture(&self, capture_type: &str) -> zbus::Result<String>;
    async fn stop_capture(&self) -> zbus::Result<()>;
    async fn toggle_lens(&self) -> zbus::Result<u8>;
    async fn set_lens(&self, lens: &str) -> zbus::Result<u8>;
    async fn get_lens(&self) -> zbus::Result<u8>;
    async fn set_option(&self, option: &str, value: &str) -> zbus::Result<()>;
    async fn config(&self) -> zbus::Result<String>;
    async fn request_permission(&self, explanation: &str) -> zbus::fdo::Result<bool>;
    async fn has_permission(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn image_captured(&self, capture_type: &str, count: u32, total: u32, path: &str)
        -> zbus::Result<()>;
    #[zbus(signal)]
    fn face_detected(&self, x: f64, y: f64, width: f64, height: f64) -> zbus::Result<()>;
    #[zbus(signal)]
    fn face_undetected(&self) -> zbus::Result<()>;
    #[zbus(signal)]
    fn end_capture(&self) -> zbus::Result<()>;
    #[zbus(signal)]
    fn barcode_scanned(&self, content: &str) -> zbus::Result<()>;
    #[zbus(signal)]
    fn status_changed(&self, kind: &str, text: &str) -> zbus::Result<()>;
    #[zbus(signal)]
    fn permission_denied(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "yoonit", about = "Yoonit camera CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera without analysis
    Preview,
    /// Start capturing: face, frame, qrcode or none
    Start {
        capture_type: String,
    },
    /// Stop capturing and release the camera
    Stop,
    /// Switch between front and back lens
    Toggle,
    /// Show the lens, or select one (front|back)
    Lens {
        lens: Option<String>,
    },
    /// Change a capture setting (e.g. `set number-of-images 5`)
    Set {
        option: String,
        value: String,
    },
    /// Show the capture configuration
    Config,
    /// Request camera permission
    Permission {
        /// Why the camera is needed
        #[arg(default_value = "The camera is used to capture images.")]
        explanation: String,
    },
    /// Show daemon status
    Status,
    /// Print camera events until interrupted
    Watch,
}

fn lens_name(id: u8) -> String {
    id.to_string()
        .parse::<Lens>()
        .map(|lens| lens.to_string())
        .unwrap_or_else(|_| format!("unknown ({id})"))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Resolve permission before touching the camera.
async fn ensure_permission(proxy: &CameraProxy<'_>, explanation: &str) -> Result<bool> {
    match proxy.request_permission(explanation).await {
        Ok(granted) => Ok(granted),
        Err(zbus::fdo::Error::AccessDenied(msg)) => {
            eprintln!("Camera permission denied: {msg}");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn describe_image(capture_type: &str, count: u32, total: u32, path: &str) -> String {
    let progress = if total == 0 {
        format!("{count}")
    } else {
        format!("{count}/{total}")
    };
    if path.is_empty() {
        return format!("image captured [{capture_type}] {progress} (not saved)");
    }
    match ImageRef::from_file(Path::new(path)) {
        Ok(image) => format!(
            "image captured [{capture_type}] {progress} {path} ({}x{})",
            image.width(),
            image.height()
        ),
        Err(e) => format!("image captured [{capture_type}] {progress} {path} (unreadable: {e})"),
    }
}

async fn watch(proxy: &CameraProxy<'_>) -> Result<()> {
    let mut images = proxy.receive_image_captured().await?;
    let mut detected = proxy.receive_face_detected().await?;
    let mut undetected = proxy.receive_face_undetected().await?;
    let mut ended = proxy.receive_end_capture().await?;
    let mut barcodes = proxy.receive_barcode_scanned().await?;
    let mut statuses = proxy.receive_status_changed().await?;
    let mut denied = proxy.receive_permission_denied().await?;

    println!("Watching camera events (Ctrl-C to stop)...");
    loop {
        tokio::select! {
            Some(signal) = images.next() => {
                let args = signal.args()?;
                println!("{}", describe_image(args.capture_type(), *args.count(), *args.total(), args.path()));
            }
            Some(signal) = detected.next() => {
                let args = signal.args()?;
                println!(
                    "face detected at ({:.0}, {:.0}) {:.0}x{:.0}",
                    args.x(), args.y(), args.width(), args.height()
                );
            }
            Some(_) = undetected.next() => println!("face undetected"),
            Some(_) = ended.next() => println!("capture ended"),
            Some(signal) = barcodes.next() => {
                let args = signal.args()?;
                println!("barcode: {}", args.content());
            }
            Some(signal) = statuses.next() => {
                let args = signal.args()?;
                println!("{}: {}", args.kind(), args.text());
            }
            Some(_) = denied.next() => println!("camera permission denied"),
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = CameraProxy::new(&conn)
        .await
        .context("yoonitd is not reachable")?;
    tracing::debug!(system = cli.system, "connected to yoonitd");

    match cli.command {
        Commands::Preview => {
            if ensure_permission(&proxy, "The camera preview needs the camera.").await? {
                println!("State: {}", proxy.preview().await?);
            }
        }
        Commands::Start { capture_type } => {
            if ensure_permission(&proxy, "Capturing needs the camera.").await? {
                println!("State: {}", proxy.start_capture(&capture_type).await?);
            }
        }
        Commands::Stop => {
            proxy.stop_capture().await?;
            println!("Capture stopped");
        }
        Commands::Toggle => {
            let lens = proxy.toggle_lens().await?;
            println!("Lens: {}", lens_name(lens));
        }
        Commands::Lens { lens } => {
            let lens = match lens {
                Some(lens) => proxy.set_lens(&lens).await?,
                None => proxy.get_lens().await?,
            };
            println!("Lens: {}", lens_name(lens));
        }
        Commands::Set { option, value } => {
            proxy.set_option(&option, &value).await?;
            println!("{option} = {value}");
        }
        Commands::Config => print_json(&proxy.config().await?)?,
        Commands::Permission { explanation } => {
            let granted = ensure_permission(&proxy, &explanation).await?;
            println!("Permission: {}", if granted { "granted" } else { "denied" });
        }
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Watch => watch(&proxy).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lens_name() {
        assert_eq!(lens_name(0), "front");
        assert_eq!(lens_name(1), "back");
        assert_eq!(lens_name(7), "unknown (7)");
    }

    #[test]
    fn test_describe_unsaved_image() {
        assert_eq!(
            describe_image("face", 2, 5, ""),
            "image captured [face] 2/5 (not saved)"
        );
        assert_eq!(
            describe_image("frame", 3, 0, ""),
            "image captured [frame] 3 (not saved)"
        );
    }

    #[test]
    fn test_describe_missing_file() {
        let line = describe_image("face", 1, 1, "/nonexistent/yoonit.png");
        assert!(line.contains("unreadable"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["yoonit", "--system", "set", "roi-top-offset", "0.1"]).unwrap();
        assert!(cli.system);
        assert!(matches!(cli.command, Commands::Set { ref option, .. } if option == "roi-top-offset"));

        let cli = Cli::try_parse_from(["yoonit", "lens"]).unwrap();
        assert!(matches!(cli.command, Commands::Lens { lens: None }));

        let cli = Cli::try_parse_from(["yoonit", "permission"]).unwrap();
        assert!(matches!(cli.command, Commands::Permission { .. }));
    }
}
