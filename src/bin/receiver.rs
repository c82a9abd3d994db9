//! Audio Receiver Application
//!
//! Connects to a sender, follows its settings headers and plays the
//! audio on an output device.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sound_link::{
    audio::{
        device::{list_devices, DeviceMode},
        playback::AudioPlayback,
    },
    config::AppConfig,
    network::{ReceiverEvent, StreamReceiver},
    protocol::{AudioFormat, Framing},
    ui::{
        layout::apply_receiver_event,
        server::{shared_layout, SharedLayout},
        AppState, LayoutHandler, ReceiverLayout, WebServer,
    },
};

/// Play audio streamed by a sender
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sender address, as printed by the sender
    address: SocketAddr,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wire framing: framed, legacy or legacy-compat
    #[arg(long)]
    framing: Option<Framing>,

    /// Output device id
    #[arg(short, long)]
    device: Option<String>,

    /// Playback buffer in milliseconds
    #[arg(long)]
    buffer_ms: Option<u32>,

    /// Control API port
    #[arg(long)]
    http_port: Option<u16>,

    /// Disable the control API
    #[arg(long)]
    no_ui: bool,

    /// Start muted
    #[arg(long)]
    muted: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(framing) = self.framing {
            config.network.framing = framing;
        }
        if let Some(device) = &self.device {
            config.audio.device_id = device.clone();
        }
        if let Some(ms) = self.buffer_ms {
            config.audio.playback_buffer_ms = ms;
        }
        if let Some(port) = self.http_port {
            config.ui.http_port = port;
        }
        if self.no_ui {
            config.ui.enabled = false;
        }
    }
}

/// Replace playback for a newly announced format
fn configure(
    config: &AppConfig,
    format: &AudioFormat,
    muted: bool,
    layout: &SharedLayout,
) -> Option<AudioPlayback> {
    let playback = AudioPlayback::new(
        &config.audio.device_id,
        format.clone(),
        config.audio.playback_buffer_ms,
    )
    .and_then(|mut playback| playback.start().map(|_| playback));

    let mut layout = layout.lock();
    match playback {
        Ok(playback) => {
            playback.set_muted(muted);
            layout.on_good_configure();
            layout.on_buffer_size_changed(playback.buffer_size());
            tracing::info!("Playing {}", format);
            Some(playback)
        }
        Err(e) => {
            tracing::error!("Cannot play {}: {}", format, e);
            layout.on_bad_configure(&e.to_string());
            None
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
    tracing::info!("Starting Sound Link receiver");

    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    println!("\n=== Available Output Devices ===");
    let devices = list_devices(DeviceMode::Output);
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
    }
    println!();

    let layout = shared_layout(ReceiverLayout::new(devices, config.audio.format.clone()));
    let (mute_tx, mut mute_rx) = watch::channel(args.muted);
    layout.lock().on_mute(args.muted);

    if config.ui.enabled {
        let web_server = WebServer::new(
            config.ui.clone(),
            AppState::for_receiver(layout.clone(), mute_tx),
        );
        let _web_handle = web_server.start_background();
    }

    let receiver = StreamReceiver::connect(args.address, config.network.framing).await?;
    layout.lock().on_connect();

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let reader = tokio::spawn(receiver.run(event_tx));

    let mut playback: Option<AudioPlayback> = None;
    let mut progress = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                apply_receiver_event(&mut **layout.lock(), &event);
                match event {
                    ReceiverEvent::Configured(format) => {
                        if let Some(mut old) = playback.take() {
                            old.stop();
                        }
                        let muted = *mute_rx.borrow();
                        playback = configure(&config, &format, muted, &layout);
                    }
                    ReceiverEvent::Audio(data) => {
                        if let Some(playback) = playback.as_mut() {
                            if let Err(e) = playback.push_bytes(&data) {
                                tracing::warn!("Dropping audio: {}", e);
                            }
                        }
                    }
                    ReceiverEvent::Stopped => {
                        if let Some(mut old) = playback.take() {
                            old.stop();
                        }
                    }
                    ReceiverEvent::Disconnected => break,
                }
            }
            Ok(()) = mute_rx.changed() => {
                let muted = *mute_rx.borrow_and_update();
                if let Some(playback) = playback.as_ref() {
                    playback.set_muted(muted);
                }
            }
            _ = progress.tick() => {
                if let Some(playback) = playback.as_ref() {
                    layout.lock().on_processed_usec(playback.processed_usec());
                }
            }
        }
    }

    if let Some(mut playback) = playback.take() {
        playback.stop();
    }
    reader.abort();
    match reader.await {
        Ok(Ok(stats)) => tracing::info!(
            "Received {:.1} KB ({} headers, {} stops)",
            stats.bytes_received as f64 / 1024.0,
            stats.headers,
            stats.stops
        ),
        Ok(Err(e)) => tracing::error!("Receiver error: {}", e),
        Err(_) => {}
    }
    Ok(())
}
