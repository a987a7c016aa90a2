//! HTTP API for the visionpath relay.
//!
//! Runs on port 2004 by default. CORS-permissive so a phone UI or web client
//! on another origin can drive the session.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use visionpath_core::types::{Mode, SessionStatus};
use visionpath_core::voice::VoiceEvent;

use crate::config::GenerationConfig;
use crate::error::{ErrorKind, GenerationError};
use crate::generation::{ChatService, GenerationService};
use crate::pipeline;
use crate::session::SessionHandle;

/// Prompts sent with each frame, per mode.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub navigation: String,
    pub reading: String,
}

impl From<&GenerationConfig> for Prompts {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            navigation: config.navigation_prompt.clone(),
            reading: config.reading_prompt.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub generator: Arc<dyn GenerationService>,
    pub chat: Arc<dyn ChatService>,
    pub prompts: Arc<Prompts>,
}

/// Build the axum router over a running session.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/mode", post(set_mode))
        .route("/response", post(set_response))
        .route("/response/chunk", post(append_chunk))
        .route("/watermark", post(set_watermark))
        .route("/narrate", post(narrate))
        .route("/voice/event", post(voice_event))
        .route("/blind-mode", post(start_blind_mode))
        .route("/frame", post(frame))
        .route("/chat", post(chat))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct OkResponse {
    ok: bool,
}

const OK: Json<OkResponse> = Json(OkResponse { ok: true });

async fn status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.status())
}

#[derive(serde::Deserialize)]
struct ModeRequest {
    mode: Mode,
}

async fn set_mode(State(state): State<AppState>, Json(req): Json<ModeRequest>) -> Json<OkResponse> {
    state.session.set_mode(req.mode);
    OK
}

#[derive(serde::Deserialize)]
struct TextRequest {
    mode: Mode,
    text: String,
}

async fn set_response(
    State(state): State<AppState>,
    Json(req): Json<TextRequest>,
) -> Json<OkResponse> {
    state.session.set_response(req.mode, req.text);
    OK
}

#[derive(serde::Deserialize)]
struct ChunkRequest {
    mode: Mode,
    text: String,
    /// First chunk of a new response: clear the old text first.
    #[serde(default)]
    begin: bool,
}

async fn append_chunk(
    State(state): State<AppState>,
    Json(req): Json<ChunkRequest>,
) -> Json<OkResponse> {
    if req.begin {
        let response = state.session.begin_response(req.mode);
        state.session.append_response_chunk(response, req.text);
    } else {
        state.session.append_chunk(req.mode, req.text);
    }
    OK
}

#[derive(serde::Deserialize)]
struct WatermarkRequest {
    index: usize,
}

async fn set_watermark(
    State(state): State<AppState>,
    Json(req): Json<WatermarkRequest>,
) -> Json<OkResponse> {
    state.session.set_watermark(req.index);
    OK
}

async fn narrate(State(state): State<AppState>) -> Json<OkResponse> {
    state.session.narrate();
    OK
}

async fn voice_event(
    State(state): State<AppState>,
    Json(event): Json<VoiceEvent>,
) -> Json<OkResponse> {
    state.session.voice_event(event);
    OK
}

async fn start_blind_mode(State(state): State<AppState>) -> Json<OkResponse> {
    state.session.start_blind_mode();
    OK
}

#[derive(serde::Deserialize)]
struct FrameQuery {
    #[serde(default)]
    mode: Mode,
}

#[derive(serde::Serialize)]
struct GenerationResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
}

fn generation_result(
    result: Result<String, GenerationError>,
) -> (StatusCode, Json<GenerationResponse>) {
    match result {
        Ok(text) => (
            StatusCode::OK,
            Json(GenerationResponse {
                ok: true,
                text: Some(text),
                error: None,
                error_kind: None,
            }),
        ),
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Unexpected => StatusCode::BAD_GATEWAY,
            };
            (
                code,
                Json(GenerationResponse {
                    ok: false,
                    text: None,
                    error: Some(e.to_string()),
                    error_kind: Some(e.kind()),
                }),
            )
        }
    }
}

fn bad_request(message: String) -> (StatusCode, Json<GenerationResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(GenerationResponse {
            ok: false,
            text: None,
            error: Some(message),
            error_kind: None,
        }),
    )
}

/// Raw image body; the content type is passed to the model as-is.
async fn frame(
    State(state): State<AppState>,
    Query(query): Query<FrameQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<GenerationResponse>) {
    let prompt = match query.mode {
        Mode::Navigation => &state.prompts.navigation,
        Mode::Reading => &state.prompts.reading,
        Mode::Assistant => {
            return bad_request("frames are analyzed in navigation or reading mode".into());
        }
    };
    if body.is_empty() {
        return bad_request("empty image".into());
    }
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg");

    let result = pipeline::analyze_frame(
        state.generator.as_ref(),
        &state.session,
        &body,
        mime_type,
        query.mode,
        prompt,
    )
    .await;
    generation_result(result)
}

#[derive(serde::Deserialize)]
struct ChatRequest {
    message: String,
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<GenerationResponse>) {
    if req.message.trim().is_empty() {
        return bad_request("empty message".into());
    }
    let result = pipeline::ask(state.chat.as_ref(), &state.session, &req.message).await;
    generation_result(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::{stream, StreamExt};
    use serde_json::{json, Value};
    use tokio::sync::watch;
    use visionpath_core::types::{RelayConfig, SpeechRequest};

    use crate::generation::TextStream;
    use crate::session::Session;
    use crate::speech::SpeechOutput;

    struct Silent;

    impl SpeechOutput for Silent {
        fn speak(&self, _request: SpeechRequest) {}
        fn stop(&self) {}
    }

    struct Fixed;

    #[async_trait]
    impl GenerationService for Fixed {
        async fn stream(
            &self,
            _image: &[u8],
            mime_type: &str,
            prompt: &str,
        ) -> Result<TextStream, GenerationError> {
            let text = format!("{prompt} ({mime_type}).");
            Ok(stream::iter([Ok(text)]).boxed())
        }
    }

    struct Offline;

    #[async_trait]
    impl ChatService for Offline {
        async fn send_message(
            &self,
            _message: &str,
            _frame_data: Option<&str>,
        ) -> Result<String, GenerationError> {
            Err(GenerationError::Network("timed out".into()))
        }
    }

    struct TestServer {
        base: String,
        client: reqwest::Client,
        _session: Session,
        _online: watch::Sender<bool>,
    }

    async fn serve() -> TestServer {
        let config = RelayConfig {
            onboarding: false,
            ..RelayConfig::default()
        };
        let (online, online_rx) = watch::channel(true);
        let session = Session::start(config, Arc::new(Silent), online_rx);
        let app = router(AppState {
            session: session.handle(),
            generator: Arc::new(Fixed),
            chat: Arc::new(Offline),
            prompts: Arc::new(Prompts {
                navigation: "Describe".into(),
                reading: "Read".into(),
            }),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TestServer {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            _session: session,
            _online: online,
        }
    }

    impl TestServer {
        async fn post(&self, path: &str, body: Value) -> reqwest::Response {
            self.client
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap()
        }

        async fn status(&self) -> Value {
            self.client
                .get(format!("{}/status", self.base))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn response_and_mode_show_in_status() {
        let s = serve().await;
        s.post("/response", json!({"mode": "navigation", "text": "Stop now. Turn left."}))
            .await;
        s.post("/mode", json!({"mode": "reading"})).await;

        let mut status = s.status().await;
        for _ in 0..50 {
            if status["mode"] == "reading" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            status = s.status().await;
        }
        assert_eq!(status["mode"], "reading");
        assert_eq!(status["responses"]["navigation"], "Stop now. Turn left.");
        assert_eq!(status["watermark"], 20);
        assert_eq!(status["online"], true);
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let s = serve().await;
        let resp = s.post("/mode", json!({"mode": "driving"})).await;
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn frame_streams_model_output() {
        let s = serve().await;
        let resp = s
            .client
            .post(format!("{}/frame?mode=reading", s.base))
            .header("content-type", "image/png")
            .body(vec![1u8, 2, 3])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["text"], "Read (image/png).");
    }

    #[tokio::test]
    async fn frame_in_assistant_mode_is_bad_request() {
        let s = serve().await;
        let resp = s
            .client
            .post(format!("{}/frame?mode=assistant", s.base))
            .body(vec![1u8])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn chat_failure_reports_kind() {
        let s = serve().await;
        let resp = s.post("/chat", json!({"message": "where am I"})).await;
        assert_eq!(resp.status(), 503);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error_kind"], "network");
        assert_eq!(body["error"], "Network error: timed out");
    }
}
