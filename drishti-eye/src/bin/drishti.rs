//! drishti: serve the live camera stream and the vision assistant API

use anyhow::Context;
use clap::Parser;
use drishti_eye::config::AssistantConfig;
use drishti_eye::{server, VisionAssistant};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "drishti")]
#[command(about = "Live camera perception with object detection and visual question answering", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Synthetic camera and demo detector, no hardware needed
    #[arg(long)]
    demo: bool,

    /// Camera device index
    #[arg(long)]
    camera: Option<u32>,

    /// Start capturing as soon as the server is up
    #[arg(long)]
    autostart: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<AssistantConfig> {
    let mut config = match &cli.config {
        Some(path) => AssistantConfig::from_file(path).map_err(anyhow::Error::msg)?,
        None => AssistantConfig::default(),
    };
    config.apply_env();

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(camera) = cli.camera {
        config.capture.device_index = camera;
    }
    if cli.demo {
        config.demo = true;
    }

    config.validate().map_err(anyhow::Error::msg).context("Invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let address = config.server.bind_address();
    let autostart = cli.autostart;

    info!(
        "Starting drishti (camera {}, {}x{} @ {}fps, broadcast {}fps{})",
        config.capture.device_index,
        config.capture.resolution.0,
        config.capture.resolution.1,
        config.capture.device_fps,
        config.capture.broadcast_fps,
        if config.demo { ", demo mode" } else { "" }
    );

    let assistant = Arc::new(VisionAssistant::from_config(config)?);
    if autostart {
        if let Err(e) = assistant.start_capture().await {
            warn!("Autostart failed: {}", e);
        }
    }

    server::serve(assistant.clone(), &address, shutdown_signal())
        .await
        .with_context(|| format!("Server on {} failed", address))?;

    assistant.stop_capture().await;
    info!("drishti stopped");
    Ok(())
}
