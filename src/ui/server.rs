//! HTTP control server

use axum::{
    routing::{get, post, put},
    Router,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::config::UiConfig;
use crate::error::{Error, NetworkError};
use crate::network::{SenderHandle, SessionEvent};
use crate::ui::handlers;
use crate::ui::layout::{apply_session_event, LayoutHandler};

/// Layout shared between handlers and event pumps
pub type SharedLayout = Arc<Mutex<Box<dyn LayoutHandler>>>;

pub fn shared_layout(layout: impl LayoutHandler + 'static) -> SharedLayout {
    Arc::new(Mutex::new(Box::new(layout)))
}

/// Shared application state
pub struct AppState {
    pub layout: SharedLayout,
    /// Present on the sender
    pub sender: Option<SenderHandle>,
    /// Present on the receiver
    pub mute: Option<watch::Sender<bool>>,
}

impl AppState {
    pub fn for_sender(layout: SharedLayout, sender: SenderHandle) -> Self {
        Self {
            layout,
            sender: Some(sender),
            mute: None,
        }
    }

    pub fn for_receiver(layout: SharedLayout, mute: watch::Sender<bool>) -> Self {
        Self {
            layout,
            sender: None,
            mute: Some(mute),
        }
    }
}

/// Build the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/devices", get(handlers::get_devices))
        .route("/api/view", get(handlers::get_view))
        .route("/api/device", put(handlers::put_device))
        .route("/api/format", put(handlers::put_format))
        .route("/api/start", post(handlers::start))
        .route("/api/stop", post(handlers::stop))
        .route("/api/mute", post(handlers::set_mute))
        .layer(cors)
        .with_state(state)
}

/// Web server for the control API
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    pub fn addr(&self) -> Result<SocketAddr, Error> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid UI address: {}", e)))
    }

    /// Serve until the task is aborted
    pub async fn run(self) -> Result<(), Error> {
        let addr = self.addr()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::Bind(format!("{}: {}", addr, e)))?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, create_router(self.state)).await?;
        Ok(())
    }

    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Web server error: {}", e);
            }
        })
    }
}

/// Feed sender session events into the layout hooks
pub fn spawn_session_pump(
    mut events: broadcast::Receiver<SessionEvent>,
    layout: SharedLayout,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::debug!("Session event: {:?}", event);
                    apply_session_event(&mut **layout.lock(), &event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("UI missed {} session events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
