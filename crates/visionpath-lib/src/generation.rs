//! Generation service — streaming vision analysis and assistant chat.
//!
//! [`GeminiClient`] posts a frame plus prompt to `streamGenerateContent` with
//! `alt=sse` and yields text chunks as server-sent events arrive.
//! [`GeminiChat`] keeps a conversation and answers with `generateContent`.
//!
//! Errors are split into network failures and everything else; neither is
//! retried here.

use std::collections::VecDeque;

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::GenerationError;

/// Incremental text chunks from one generation call.
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

/// Streaming vision-language model.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn stream(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<TextStream, GenerationError>;
}

/// Conversational model for the assistant mode.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Send a user message. `frame_data` is the latest scene description.
    async fn send_message(
        &self,
        message: &str,
        frame_data: Option<&str>,
    ) -> Result<String, GenerationError>;
}

// ─── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: &'a Content,
    contents: &'a [Content],
    generation_config: &'a GenerationParams,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn into_text(self) -> Result<String, GenerationError> {
        if let Some(err) = self.error {
            return Err(GenerationError::Unexpected(err.message));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default())
    }
}

// ─── SSE decoding ──────────────────────────────────────────────────────────

/// Splits a byte stream into SSE `data:` payloads. Bytes are buffered until
/// a full line arrives so multi-byte characters split across network chunks
/// decode correctly.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buf);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

/// Text carried by one SSE event, if any.
fn parse_event(data: &str) -> Option<Result<String, GenerationError>> {
    let response: GenerateResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => return Some(Err(e.into())),
    };
    match response.into_text() {
        Ok(text) if text.is_empty() => None,
        other => Some(other),
    }
}

fn sse_text_stream<S, B>(body: S) -> TextStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    struct State<Body> {
        body: Body,
        decoder: SseDecoder,
        pending: VecDeque<Result<String, GenerationError>>,
        done: bool,
    }

    let state = State {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let payloads = st.decoder.push(bytes.as_ref());
                    st.pending.extend(payloads.iter().filter_map(|d| parse_event(d)));
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.pending.push_back(Err(e.into()));
                }
                None => {
                    st.done = true;
                    st.pending.extend(st.decoder.finish().as_deref().and_then(parse_event));
                }
            }
        }
    })
    .boxed()
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GenerationError::Unexpected(format!("HTTP {status}: {body}")))
}

// ─── Gemini vision client ──────────────────────────────────────────────────

pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    system_instruction: Content,
    params: GenerationParams,
}

impl GeminiClient {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(config.timeout())
                .build()
                .unwrap_or_default(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            system_instruction: Content::text(None, config.navigation_instruction.clone()),
            params: GenerationParams {
                temperature: config.temperature,
                top_k: config.top_k,
                top_p: config.top_p,
                max_output_tokens: config.max_output_tokens,
                response_mime_type: "text/plain",
            },
        }
    }
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn stream(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<TextStream, GenerationError> {
        let contents = [Content {
            role: Some("user".into()),
            parts: vec![
                Part {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: mime_type.to_string(),
                        data: base64::engine::general_purpose::STANDARD.encode(image),
                    }),
                },
                Part::text(prompt),
            ],
        }];
        let body = GenerateRequest {
            system_instruction: &self.system_instruction,
            contents: &contents,
            generation_config: &self.params,
        };

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.endpoint, self.model
        );
        debug!("generation: streaming {} image bytes to {}", image.len(), self.model);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        Ok(sse_text_stream(resp.bytes_stream()))
    }
}

// ─── Gemini chat ───────────────────────────────────────────────────────────

pub struct GeminiChat {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    system_instruction: Content,
    params: GenerationParams,
    history: Mutex<Vec<Content>>,
}

impl GeminiChat {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(config.timeout())
                .build()
                .unwrap_or_default(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            system_instruction: Content::text(None, config.chat_instruction.clone()),
            params: GenerationParams {
                temperature: config.chat_temperature,
                top_k: config.top_k,
                top_p: config.top_p,
                max_output_tokens: config.max_output_tokens,
                response_mime_type: "text/plain",
            },
            history: Mutex::new(Vec::new()),
        }
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}

/// Prefix the user's message with the scene description, if there is one.
pub fn compose_message(message: &str, frame_data: Option<&str>) -> String {
    match frame_data {
        Some(frame) => format!("Frame data: {frame}\n\nUser message: {message}"),
        None => message.to_string(),
    }
}

#[async_trait]
impl ChatService for GeminiChat {
    async fn send_message(
        &self,
        message: &str,
        frame_data: Option<&str>,
    ) -> Result<String, GenerationError> {
        // Held across the request so turns stay ordered.
        let mut history = self.history.lock().await;

        let user = Content::text(Some("user"), compose_message(message, frame_data));
        let mut contents = history.clone();
        contents.push(user.clone());

        let body = GenerateRequest {
            system_instruction: &self.system_instruction,
            contents: &contents,
            generation_config: &self.params,
        };
        let url = format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await?;
        let reply = serde_json::from_slice::<GenerateResponse>(&bytes)?.into_text()?;

        history.push(user);
        history.push(Content::text(Some("model"), reply.clone()));
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_splits_lines() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\":").is_empty());
        let out = d.push(b"1}\n\ndata: two\r\n");
        assert_eq!(out, vec!["{\"a\":1}", "two"]);
    }

    #[test]
    fn decoder_ignores_non_data_lines() {
        let mut d = SseDecoder::default();
        let out = d.push(b": keep-alive\nevent: message\ndata:\ndata: x\n");
        assert_eq!(out, vec!["x"]);
    }

    #[test]
    fn decoder_keeps_split_utf8() {
        let mut d = SseDecoder::default();
        let bytes = "data: café\n".as_bytes();
        let (a, b) = bytes.split_at(bytes.len() - 3); // inside 'é'
        assert!(d.push(a).is_empty());
        assert_eq!(d.push(b), vec!["café"]);
    }

    #[test]
    fn decoder_flushes_unterminated_line() {
        let mut d = SseDecoder::default();
        d.push(b"data: tail");
        assert_eq!(d.finish(), Some("tail".into()));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn event_text_is_concatenated() {
        let data = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Stop. "},{"text":"Curb ahead."}]}}]}"#;
        assert_eq!(parse_event(data), Some(Ok("Stop. Curb ahead.".into())));
    }

    #[test]
    fn event_without_text_is_skipped() {
        assert_eq!(parse_event(r#"{"candidates":[{"finishReason":"STOP"}]}"#), None);
        assert_eq!(parse_event(r#"{"usageMetadata":{}}"#), None);
    }

    #[test]
    fn api_error_is_unexpected() {
        let ev = parse_event(r#"{"error":{"code":400,"message":"API key not valid"}}"#);
        assert_eq!(
            ev,
            Some(Err(GenerationError::Unexpected("API key not valid".into())))
        );
    }

    #[test]
    fn malformed_event_is_unexpected() {
        let ev = parse_event("{not json").unwrap();
        assert!(matches!(ev, Err(GenerationError::Unexpected(_))));
    }

    #[test]
    fn compose_with_and_without_frame() {
        assert_eq!(compose_message("hi", None), "hi");
        assert_eq!(
            compose_message("what is that?", Some("A bench on the left.")),
            "Frame data: A bench on the left.\n\nUser message: what is that?"
        );
    }

    #[test]
    fn request_serializes_camel_case() {
        let config = GenerationConfig::default();
        let client = GeminiClient::new(&config);
        let contents = [Content::text(Some("user"), "hello")];
        let body = GenerateRequest {
            system_instruction: &client.system_instruction,
            contents: &contents,
            generation_config: &client.params,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("systemInstruction").is_some());
        assert_eq!(json["generationConfig"]["topK"], 64);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[tokio::test]
    async fn sse_stream_yields_chunks_then_ends() {
        let parts: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Stop.\"}]}}]}\r\n\r\nda".to_vec()),
            Ok(b"ta: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" Turn left.\"}]}}]}".to_vec()),
        ];
        let chunks: Vec<_> = sse_text_stream(stream::iter(parts)).collect().await;
        assert_eq!(chunks, vec![Ok("Stop.".to_string()), Ok(" Turn left.".to_string())]);
    }

    async fn mock_gemini(status: axum::http::StatusCode, body: &'static str) -> GenerationConfig {
        use axum::http::{HeaderMap, Uri};

        let app = axum::Router::new().fallback(move |uri: Uri, headers: HeaderMap| async move {
            let key_ok = headers
                .get("x-goog-api-key")
                .is_some_and(|v| v.as_bytes() == b"test-key");
            if !key_ok {
                return (axum::http::StatusCode::FORBIDDEN, "bad key".to_string());
            }
            (status, format!("{}\n{body}", uri.path_and_query().map(|p| p.as_str()).unwrap_or("")))
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        GenerationConfig {
            endpoint: format!("http://{addr}/"),
            model: "test-model".into(),
            api_key: "test-key".into(),
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn client_streams_from_server() {
        let config = mock_gemini(
            axum::http::StatusCode::OK,
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Bench ahead.\"}]}}]}\n\n",
        )
        .await;
        let client = GeminiClient::new(&config);
        let chunks: Vec<_> = client
            .stream(b"img", "image/jpeg", "describe")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks, vec![Ok("Bench ahead.".to_string())]);
    }

    #[tokio::test]
    async fn client_error_status_is_unexpected() {
        let config = mock_gemini(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let client = GeminiClient::new(&config);
        let err = client
            .stream(b"img", "image/jpeg", "describe")
            .await
            .err()
            .unwrap();
        match err {
            GenerationError::Unexpected(msg) => {
                assert!(msg.starts_with("HTTP 500"), "{msg}");
                assert!(msg.contains(":streamGenerateContent?alt=sse"), "{msg}");
            }
            other => panic!("expected Unexpected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let config = GenerationConfig {
            endpoint: "http://127.0.0.1:9".into(),
            ..GenerationConfig::default()
        };
        let client = GeminiClient::new(&config);
        let err = client.stream(b"", "image/jpeg", "x").await.err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Network);
    }

    #[tokio::test]
    async fn chat_keeps_history_only_on_success() {
        let config = mock_gemini(
            axum::http::StatusCode::OK,
            "",
        )
        .await;
        // The mock prefixes the path, so the body is not JSON.
        let chat = GeminiChat::new(&config);
        let err = chat.send_message("hello", None).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unexpected(_)));
        assert_eq!(chat.history_len().await, 0);
    }
}
