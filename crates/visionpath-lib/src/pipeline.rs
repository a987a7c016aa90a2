//! Generation pipeline — feeds model output into a session.
//!
//! ```text
//! frame ─▶ GenerationService::stream ─▶ chunks ─▶ hazard check ─▶ append_chunk
//! Ask   ─▶ ChatService::send_message ─────────────────────────▶ set_response
//! ```
//!
//! Failures are reported to the session (shown in its status) and returned to
//! the caller. Nothing is retried.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use visionpath_core::hazard::{mentions_hazard, HAZARD_WARNING};
use visionpath_core::types::Mode;

use crate::error::GenerationError;
use crate::generation::{ChatService, GenerationService, TextStream};
use crate::session::{SessionEvent, SessionHandle};

/// Stream one response into `mode`, replacing its previous text. Returns the
/// full text as streamed. Once a newer response begins in the same mode, the
/// session drops this one's remaining chunks.
pub async fn relay_stream(
    session: &SessionHandle,
    mode: Mode,
    mut stream: TextStream,
) -> Result<String, GenerationError> {
    let response = session.begin_response(mode);
    let mut full = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                session.report_error(&e);
                return Err(e);
            }
        };
        let chunk = if mentions_hazard(&chunk) {
            warn!("pipeline: hazard mentioned in {mode} response");
            format!("{HAZARD_WARNING}{chunk}")
        } else {
            chunk
        };
        full.push_str(&chunk);
        session.append_response_chunk(response, chunk);
    }

    debug!("pipeline: {mode} response complete ({} chars)", full.len());
    Ok(full)
}

/// Analyze one camera frame and stream the answer into `mode`.
pub async fn analyze_frame(
    generator: &dyn GenerationService,
    session: &SessionHandle,
    image: &[u8],
    mime_type: &str,
    mode: Mode,
    prompt: &str,
) -> Result<String, GenerationError> {
    let stream = match generator.stream(image, mime_type, prompt).await {
        Ok(stream) => stream,
        Err(e) => {
            session.report_error(&e);
            return Err(e);
        }
    };
    relay_stream(session, mode, stream).await
}

/// Ask the assistant. The current navigation description goes along as
/// frame data; the reply becomes the assistant response.
pub async fn ask(
    chat: &dyn ChatService,
    session: &SessionHandle,
    message: &str,
) -> Result<String, GenerationError> {
    let status = session.status();
    let frame = status.responses.navigation.trim();
    let frame_data = (!frame.is_empty()).then_some(frame);

    match chat.send_message(message, frame_data).await {
        Ok(reply) => {
            session.set_response(Mode::Assistant, reply.clone());
            Ok(reply)
        }
        Err(e) => {
            session.report_error(&e);
            Err(e)
        }
    }
}

/// Handle session events until the session goes away.
pub async fn drive_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    session: SessionHandle,
    chat: Arc<dyn ChatService>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Ask(question) => {
                info!("pipeline: asking assistant: {question:?}");
                if let Err(e) = ask(chat.as_ref(), &session, &question).await {
                    warn!("pipeline: assistant failed: {e}");
                }
            }
            SessionEvent::BlindModeStarted => info!("pipeline: blind mode started"),
            SessionEvent::ModeChanged(mode) => debug!("pipeline: mode is now {mode}"),
        }
    }
    debug!("pipeline: session events closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream;
    use tokio::sync::watch;
    use visionpath_core::types::{RelayConfig, SpeechRequest};

    use crate::session::Session;
    use crate::speech::SpeechOutput;

    struct Silent;

    impl SpeechOutput for Silent {
        fn speak(&self, _request: SpeechRequest) {}
        fn stop(&self) {}
    }

    fn session() -> (Session, watch::Sender<bool>) {
        let config = RelayConfig {
            onboarding: false,
            ..RelayConfig::default()
        };
        let (online_tx, online_rx) = watch::channel(true);
        (Session::start(config, Arc::new(Silent), online_rx), online_tx)
    }

    fn chunks(items: Vec<Result<&'static str, GenerationError>>) -> TextStream {
        stream::iter(items.into_iter().map(|r| r.map(String::from))).boxed()
    }

    struct Scripted(Vec<&'static str>);

    #[async_trait]
    impl GenerationService for Scripted {
        async fn stream(
            &self,
            _image: &[u8],
            _mime_type: &str,
            _prompt: &str,
        ) -> Result<TextStream, GenerationError> {
            Ok(chunks(self.0.iter().map(|c| Ok(*c)).collect()))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl GenerationService for Unreachable {
        async fn stream(
            &self,
            _image: &[u8],
            _mime_type: &str,
            _prompt: &str,
        ) -> Result<TextStream, GenerationError> {
            Err(GenerationError::Network("connection refused".into()))
        }
    }

    #[derive(Default)]
    struct EchoChat {
        frames: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl ChatService for EchoChat {
        async fn send_message(
            &self,
            message: &str,
            frame_data: Option<&str>,
        ) -> Result<String, GenerationError> {
            self.frames
                .lock()
                .unwrap()
                .push(frame_data.map(String::from));
            Ok(format!("You asked: {message}"))
        }
    }

    #[tokio::test]
    async fn frame_response_streams_into_session() {
        let (session, _online) = session();
        let handle = session.handle();
        let generator = Scripted(vec!["Stop now.", " Turn left."]);

        let full = analyze_frame(&generator, &handle, b"jpeg", "image/jpeg", Mode::Navigation, "go")
            .await
            .unwrap();
        assert_eq!(full, "Stop now. Turn left.");

        let mut status = handle.subscribe_status();
        status
            .wait_for(|s| s.responses.navigation == full)
            .await
            .unwrap();
    }

    fn yielding(items: Vec<&'static str>) -> TextStream {
        stream::iter(items)
            .then(|c| async move {
                tokio::task::yield_now().await;
                Ok::<_, GenerationError>(c.to_string())
            })
            .boxed()
    }

    #[tokio::test]
    async fn overlapping_streams_do_not_mix() {
        let (session, _online) = session();
        let handle = session.handle();

        let (first, second) = tokio::join!(
            relay_stream(&handle, Mode::Navigation, yielding(vec!["Stairs down. ", "Hold rail. "])),
            relay_stream(&handle, Mode::Navigation, yielding(vec!["Car ahead. ", "Stop now. "])),
        );
        assert_eq!(first.unwrap(), "Stairs down. Hold rail. ");
        let second = second.unwrap();

        let mut status = handle.subscribe_status();
        status
            .wait_for(|s| s.responses.navigation == second)
            .await
            .unwrap();

        // everything queued before this has been applied once it shows
        handle.set_watermark(0);
        let status = status.wait_for(|s| s.watermark == 0).await.unwrap();
        assert_eq!(status.responses.navigation, "Car ahead. Stop now. ");
    }

    #[tokio::test]
    async fn hazard_chunk_gets_warning() {
        let (session, _online) = session();
        let handle = session.handle();
        let stream = chunks(vec![Ok("A person holding a knife. "), Ok("Path is clear.")]);

        let full = relay_stream(&handle, Mode::Reading, stream).await.unwrap();
        assert_eq!(
            full,
            "Warning: Dangerous object detected. A person holding a knife. Path is clear."
        );
    }

    #[tokio::test]
    async fn stream_error_is_reported_and_returned() {
        let (session, _online) = session();
        let handle = session.handle();
        let stream = chunks(vec![
            Ok("Curb ahead."),
            Err(GenerationError::Unexpected("HTTP 500: boom".into())),
        ]);

        let err = relay_stream(&handle, Mode::Navigation, stream)
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Unexpected("HTTP 500: boom".into()));

        let mut status = handle.subscribe_status();
        let status = status.wait_for(|s| s.last_error.is_some()).await.unwrap();
        assert_eq!(status.last_error.as_deref(), Some("Unexpected error: HTTP 500: boom"));
        assert_eq!(status.responses.navigation, "Curb ahead.");
    }

    #[tokio::test]
    async fn failed_call_is_reported() {
        let (session, _online) = session();
        let handle = session.handle();
        let err = analyze_frame(&Unreachable, &handle, b"", "image/jpeg", Mode::Navigation, "go")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Network(_)));
    }

    #[tokio::test]
    async fn ask_sends_navigation_as_frame_data() {
        let (session, _online) = session();
        let handle = session.handle();
        let chat = EchoChat::default();

        let reply = ask(&chat, &handle, "where am I").await.unwrap();
        assert_eq!(reply, "You asked: where am I");

        handle.set_response(Mode::Navigation, "You are on a sidewalk.");
        let mut status = handle.subscribe_status();
        status
            .wait_for(|s| !s.responses.navigation.is_empty())
            .await
            .unwrap();
        ask(&chat, &handle, "what now").await.unwrap();

        let frames = chat.frames.lock().unwrap().clone();
        assert_eq!(frames, [None, Some("You are on a sidewalk.".to_string())]);

        status
            .wait_for(|s| s.responses.chat == "You asked: what now")
            .await
            .unwrap();
    }
}
