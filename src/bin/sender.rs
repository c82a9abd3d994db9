//! Audio Sender Application
//!
//! Listens for one receiver on a local IPv4 address and streams captured
//! audio to it over TCP.

use anyhow::Result;
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sound_link::{
    audio::{
        capture::CpalCaptureBackend,
        device::{list_devices, DeviceMode},
    },
    config::AppConfig,
    network::{SenderController, SessionEvent},
    protocol::Framing,
    ui::{
        server::{shared_layout, spawn_session_pump},
        AppState, LayoutHandler, SenderLayout, WebServer,
    },
};

/// Stream local audio to a receiver over TCP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen on this address instead of the first usable interface
    #[arg(short, long)]
    bind: Option<Ipv4Addr>,

    /// Listening port, 0 lets the OS choose
    #[arg(short, long)]
    port: Option<u16>,

    /// Wire framing: framed, legacy or legacy-compat
    #[arg(long)]
    framing: Option<Framing>,

    /// Input device id (see the device list printed at startup)
    #[arg(short, long)]
    device: Option<String>,

    /// Control API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Disable the control API
    #[arg(long)]
    no_ui: bool,

    /// Start streaming as soon as a receiver connects
    #[arg(long)]
    auto_start: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = self.bind {
            config.network.bind_address = Some(bind);
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(framing) = self.framing {
            config.network.framing = framing;
        }
        if let Some(device) = &self.device {
            config.audio.device_id = device.clone();
        }
        if let Some(port) = self.http_port {
            config.ui.http_port = port;
        }
        if self.no_ui {
            config.ui.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting Sound Link sender");

    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    println!("\n=== Available Input Devices ===");
    let devices = list_devices(DeviceMode::Input);
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let (sender, task) = SenderController::spawn(
        &config.network,
        &config.audio.device_id,
        Box::new(CpalCaptureBackend),
    )?;
    let endpoint = sender.endpoint();
    println!("Receivers connect to {}\n", endpoint);

    let layout = shared_layout(SenderLayout::new(
        devices,
        config.audio.format.clone(),
        endpoint,
    ));
    if !config.audio.device_id.is_empty() {
        if let Err(e) = layout.lock().form_mut().select_device(&config.audio.device_id) {
            tracing::warn!("Configured device not usable: {}", e);
        }
    }
    let _pump = spawn_session_pump(sender.subscribe(), layout.clone());

    if config.ui.enabled {
        let web_server = WebServer::new(
            config.ui.clone(),
            AppState::for_sender(layout.clone(), sender.clone()),
        );
        let _web_handle = web_server.start_background();
    }

    let mut events = sender.subscribe();
    let mut stats = tokio::time::interval(Duration::from_secs(5));
    tracing::info!("Waiting for a receiver - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Connected { peer, .. }) if args.auto_start => {
                    let format = layout.lock().form().format().clone();
                    tracing::info!("Receiver {} connected, starting {}", peer, format);
                    if let Err(e) = sender.start(format).await {
                        tracing::error!("Failed to start streaming: {}", e);
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = stats.tick() => {
                let status = sender.status();
                if let Some(peer) = status.peer {
                    tracing::info!(
                        "Stats: {} to {}, {:.1} KB sent",
                        status.state,
                        peer,
                        status.bytes_sent as f64 / 1024.0
                    );
                }
            }
        }
    }

    tracing::info!("Shutting down");
    sender.shutdown().await;
    task.await?;
    Ok(())
}
