use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::Settings;
use facegate_hw::Camera;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod live;
mod preview;

#[zbus::proxy(
    interface = "io.facegate.Facegate1",
    default_service = "io.facegate.Facegate1",
    default_path = "/io/facegate/Facegate1"
)]
trait Facegate {
    fn compute_embedding(&self, image: &[u8]) -> zbus::Result<String>;
    fn register(&self, image: &[u8]) -> zbus::Result<String>;
    fn verify(&self, image: &[u8]) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
    fn clear_registration(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face verification CLI")]
struct Cli {
    /// Print raw JSON replies from the daemon
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect a face in an image and show its embedding summary
    Embed {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// Register the face in an image, replacing any previous registration
    Register { image: PathBuf },
    /// Check whether the face in an image is the registered one
    Verify { image: PathBuf },
    /// Show daemon status
    Status,
    /// Remove the registered face
    Clear,
    /// Verify continuously against a webcam
    Live {
        /// V4L2 device (defaults to FACEGATE_CAMERA_DEVICE or /dev/video0)
        #[arg(short, long)]
        device: Option<String>,
        /// Minimum milliseconds between checks
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Keep an annotated PNG of the latest frame at this path
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

async fn connect(settings: &Settings) -> Result<FacegateProxy<'static>> {
    let conn = if settings.system_bus {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;

    FacegateProxy::new(&conn)
        .await
        .context("failed to create facegated proxy")
}

/// Turn daemon errors into messages a user can act on.
fn explain(e: zbus::Error) -> anyhow::Error {
    if let zbus::Error::MethodError(name, detail, _) = &e {
        let detail = detail.as_deref().unwrap_or("");
        return match name.as_str().rsplit('.').next() {
            Some("NoRegistration") => {
                anyhow!("no face registered; run `facegate register <IMAGE>` first")
            }
            Some("InvalidImage") => anyhow!("not a readable image: {detail}"),
            Some("ServiceUnknown") => anyhow!("facegated is not running"),
            _ => anyhow!("{}: {detail}", name.as_str()),
        };
    }
    anyhow!(e)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_embedding(reply: &Value) {
    if reply["faces_detected"].as_u64().unwrap_or(0) == 0 {
        println!("no face detected");
        return;
    }
    let b = &reply["box"];
    println!(
        "face at ({}, {}) {}x{}, confidence {:.3}",
        b["x"], b["y"], b["width"], b["height"],
        reply["confidence"].as_f64().unwrap_or(0.0)
    );
    if let Some(sharpness) = reply["sharpness"].as_f64() {
        println!("sharpness: {sharpness:.1}");
    }
    let dim = reply["embedding"].as_array().map(|a| a.len()).unwrap_or(0);
    println!("embedding: {dim} values");
}

fn print_registration(reply: &Value) {
    match reply["result"].as_str() {
        Some("registered") => println!(
            "registered (confidence {:.3}) at {}",
            reply["confidence"].as_f64().unwrap_or(0.0),
            reply["registered_at"].as_str().unwrap_or("?")
        ),
        _ => println!("no face detected; registration unchanged"),
    }
}

fn print_verification(reply: &Value) {
    let result = reply["result"].as_str().unwrap_or("?");
    let threshold = reply["threshold"].as_f64().unwrap_or(0.0);
    match reply["similarity"].as_f64() {
        Some(similarity) => {
            println!("{result} (similarity {similarity:.3}, threshold {threshold:.2})")
        }
        None => println!("{result}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Commands::Embed { image } => {
            let bytes = read_image(&image)?;
            let proxy = connect(&settings).await?;
            let raw = proxy.compute_embedding(&bytes).await.map_err(explain)?;
            if cli.json {
                println!("{raw}");
            } else {
                print_embedding(&serde_json::from_str(&raw)?);
            }
        }
        Commands::Register { image } => {
            let bytes = read_image(&image)?;
            let proxy = connect(&settings).await?;
            let raw = proxy.register(&bytes).await.map_err(explain)?;
            if cli.json {
                println!("{raw}");
            } else {
                print_registration(&serde_json::from_str(&raw)?);
            }
        }
        Commands::Verify { image } => {
            let bytes = read_image(&image)?;
            let proxy = connect(&settings).await?;
            let raw = proxy.verify(&bytes).await.map_err(explain)?;
            if cli.json {
                println!("{raw}");
            } else {
                print_verification(&serde_json::from_str(&raw)?);
            }
        }
        Commands::Status => {
            let proxy = connect(&settings).await?;
            let raw = proxy.status().await.map_err(explain)?;
            let status: Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Clear => {
            let proxy = connect(&settings).await?;
            if proxy.clear_registration().await.map_err(explain)? {
                println!("registration removed");
            } else {
                println!("nothing was registered");
            }
        }
        Commands::Live {
            device,
            interval_ms,
            preview,
        } => {
            let opts = live::LiveOptions {
                device: device.unwrap_or_else(|| settings.camera_device.clone()),
                interval: interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(settings.check_interval),
                preview,
            };
            live::run(settings, opts).await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}
