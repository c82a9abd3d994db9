//! HTTP API handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::audio::device::{list_devices, DeviceDescriptor, DeviceMode};
use crate::network::SessionStatus;
use crate::protocol::AudioFormat;
use crate::ui::layout::FormView;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> Reply<T> {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn fail<T>(status: StatusCode, msg: impl Into<String>) -> Reply<T> {
    (status, Json(ApiResponse::error(msg)))
}

/// Get the sender session status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Reply<SessionStatus> {
    match &state.sender {
        Some(sender) => ok(sender.status()),
        None => fail(StatusCode::CONFLICT, "no sender session on a receiver"),
    }
}

#[derive(Debug, Deserialize)]
pub struct DevicesQuery {
    pub mode: Option<DeviceMode>,
}

/// List audio devices, input or output. Defaults to the layout's side.
pub async fn get_devices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DevicesQuery>,
) -> Reply<Vec<DeviceDescriptor>> {
    let mode = query
        .mode
        .unwrap_or_else(|| state.layout.lock().form().device_mode());
    let devices = tokio::task::spawn_blocking(move || list_devices(mode)).await;
    match devices {
        Ok(devices) => ok(devices),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Current form as the UI should render it
pub async fn get_view(State(state): State<Arc<AppState>>) -> Reply<FormView> {
    ok(state.layout.lock().view())
}

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub device_id: String,
}

/// Select the device used on the next start
pub async fn put_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceRequest>,
) -> Reply<FormView> {
    if let Err(reason) = state.layout.lock().form_mut().select_device(&req.device_id) {
        return fail(StatusCode::CONFLICT, reason);
    }
    if let Some(sender) = &state.sender {
        if let Err(e) = sender.select_device(req.device_id.clone()).await {
            return fail(StatusCode::CONFLICT, e.to_string());
        }
    }
    ok(state.layout.lock().view())
}

/// Replace the format shown in the form
pub async fn put_format(
    State(state): State<Arc<AppState>>,
    Json(format): Json<AudioFormat>,
) -> Reply<FormView> {
    let mut layout = state.layout.lock();
    match layout.form_mut().set_format(format) {
        Ok(()) => {
            layout.on_good_configure();
            ok(layout.view())
        }
        Err(reason) => {
            layout.on_bad_configure(&reason);
            fail(StatusCode::BAD_REQUEST, reason)
        }
    }
}

/// Start streaming the form's format
pub async fn start(State(state): State<Arc<AppState>>) -> Reply<()> {
    let Some(sender) = &state.sender else {
        return fail(StatusCode::CONFLICT, "a receiver cannot start streaming");
    };
    let format = state.layout.lock().form().format().clone();
    match sender.start(format).await {
        Ok(()) => ok(()),
        Err(e) => {
            let reason = e.to_string();
            state.layout.lock().on_bad_configure(&reason);
            fail(StatusCode::CONFLICT, reason)
        }
    }
}

/// Stop streaming, keeping the receiver connected
pub async fn stop(State(state): State<Arc<AppState>>) -> Reply<()> {
    let Some(sender) = &state.sender else {
        return fail(StatusCode::CONFLICT, "a receiver cannot stop streaming");
    };
    match sender.stop().await {
        Ok(()) => ok(()),
        Err(e) => fail(StatusCode::CONFLICT, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

/// Mute or unmute playback
pub async fn set_mute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MuteRequest>,
) -> Reply<()> {
    let Some(mute) = &state.mute else {
        return fail(StatusCode::CONFLICT, "the sender has no playback to mute");
    };
    mute.send_replace(req.muted);
    state.layout.lock().on_mute(req.muted);
    ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{CaptureBackend, CaptureHandle, CaptureSink, CaptureState};
    use crate::config::NetworkConfig;
    use crate::error::AudioError;
    use crate::network::{SenderController, SenderHandle};
    use crate::ui::layout::{ReceiverLayout, SenderLayout, UiMode};
    use crate::ui::server::{create_router, shared_layout};
    use axum::body::Body;
    use axum::http::Request;
    use std::net::Ipv4Addr;
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct IdleHandle;

    impl CaptureHandle for IdleHandle {
        fn state(&self) -> CaptureState {
            CaptureState::Active
        }

        fn stop(&mut self) {}
    }

    struct IdleBackend;

    impl CaptureBackend for IdleBackend {
        fn open(
            &mut self,
            _device_id: &str,
            _format: &AudioFormat,
            _sink: CaptureSink,
        ) -> Result<Box<dyn CaptureHandle>, AudioError> {
            Ok(Box::new(IdleHandle))
        }
    }

    fn spawn_sender() -> SenderHandle {
        let config = NetworkConfig {
            bind_address: Some(Ipv4Addr::LOCALHOST),
            ..NetworkConfig::default()
        };
        let (handle, _task) = SenderController::spawn(&config, "", Box::new(IdleBackend)).unwrap();
        handle
    }

    fn sender_state() -> Arc<AppState> {
        let sender = spawn_sender();
        let layout = shared_layout(SenderLayout::new(
            vec![],
            AudioFormat::default(),
            sender.endpoint(),
        ));
        Arc::new(AppState::for_sender(layout, sender))
    }

    fn receiver_state() -> (Arc<AppState>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let layout = shared_layout(ReceiverLayout::new(vec![], AudioFormat::default()));
        (Arc::new(AppState::for_receiver(layout, tx)), rx)
    }

    async fn call(
        state: Arc<AppState>,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = create_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_listening() {
        let state = sender_state();
        let (status, body) = call(state, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["state"], "listening");
    }

    #[tokio::test]
    async fn test_view_is_editable_before_connect() {
        let state = sender_state();
        let (status, body) = call(state, "GET", "/api/view", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["mode"], "editable");
        assert!(body["data"]["options"].is_object());
    }

    #[tokio::test]
    async fn test_bad_format_rejected() {
        let state = sender_state();
        let mut format = serde_json::to_value(AudioFormat::default()).unwrap();
        format["sample_rate"] = serde_json::json!(0);

        let (status, body) = call(state.clone(), "PUT", "/api/format", Some(format)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(state.layout.lock().view().info.starts_with("Error"));
    }

    #[tokio::test]
    async fn test_good_format_applied() {
        let state = sender_state();
        let format = AudioFormat {
            sample_rate: 44100,
            ..AudioFormat::default()
        };
        let body = serde_json::to_value(&format).unwrap();
        let (status, body) = call(state.clone(), "PUT", "/api/format", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["format"]["sample_rate"], "44100");
        assert_eq!(state.layout.lock().form().format(), &format);
    }

    #[tokio::test]
    async fn test_start_without_receiver_conflicts() {
        let state = sender_state();
        let (status, body) = call(state, "POST", "/api/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("start"));
    }

    #[tokio::test]
    async fn test_format_locked_while_read_only() {
        let state = sender_state();
        state.layout.lock().form_mut().set_mode(UiMode::ReadOnly);
        let body = serde_json::to_value(AudioFormat::default()).unwrap();
        let (status, _) = call(state, "PUT", "/api/format", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_receiver_mute() {
        let (state, rx) = receiver_state();
        let (status, _) = call(
            state.clone(),
            "POST",
            "/api/mute",
            Some(serde_json::json!({ "muted": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(*rx.borrow());
        assert_eq!(state.layout.lock().view().details["muted"], "true");
    }

    #[tokio::test]
    async fn test_receiver_has_no_stream_controls() {
        let (state, _rx) = receiver_state();
        let (status, _) = call(state.clone(), "POST", "/api/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(state, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_sender_has_no_mute() {
        let state = sender_state();
        let (status, _) = call(
            state,
            "POST",
            "/api/mute",
            Some(serde_json::json!({ "muted": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
