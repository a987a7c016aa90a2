//! Speech output — where relay decisions become audible.
//!
//! ```text
//! session actor → speak(req) → [cmd_tx] → dispatcher task → POST /stop, /speak
//! ```
//!
//! `speak()` never blocks the caller. The dispatcher issues requests in order,
//! so a Flush (stop, then speak) can't overtake an earlier Add.

use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use visionpath_core::types::{SpeechMode, SpeechRequest};

/// Text-to-speech collaborator.
pub trait SpeechOutput: Send + Sync {
    /// Queue an utterance. Flush discards anything pending or playing first.
    fn speak(&self, request: SpeechRequest);

    /// Drop everything pending or playing.
    fn stop(&self);
}

// ─── HTTP speech server ────────────────────────────────────────────────────

enum Cmd {
    Speak(SpeechRequest),
    Stop,
}

/// Drives an external TTS server over HTTP (`/speak`, `/stop`).
#[derive(Clone)]
pub struct HttpSpeech {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
}

#[derive(Serialize)]
struct SpeakBody<'a> {
    text: &'a str,
    utterance_id: &'a str,
}

impl HttpSpeech {
    /// Spawn the dispatcher. Must be called from within a tokio runtime.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatcher_task(cmd_rx, Client::new(), base_url));
        Self { cmd_tx }
    }
}

impl SpeechOutput for HttpSpeech {
    fn speak(&self, request: SpeechRequest) {
        let _ = self.cmd_tx.send(Cmd::Speak(request));
    }

    fn stop(&self) {
        let _ = self.cmd_tx.send(Cmd::Stop);
    }
}

async fn dispatcher_task(mut cmd_rx: mpsc::UnboundedReceiver<Cmd>, client: Client, base_url: String) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Cmd::Speak(req) => {
                if req.mode == SpeechMode::Flush {
                    post_stop(&client, &base_url).await;
                }
                let body = SpeakBody {
                    text: &req.text,
                    utterance_id: &req.utterance_id,
                };
                debug!("speech: POST /speak [{}] {} chars", req.utterance_id, req.text.len());
                match client.post(format!("{base_url}/speak")).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => warn!("speech: server returned {}", resp.status()),
                    Err(e) => warn!("speech: request failed: {e}"),
                }
            }
            Cmd::Stop => post_stop(&client, &base_url).await,
        }
    }
    debug!("speech: dispatcher stopped");
}

async fn post_stop(client: &Client, base_url: &str) {
    if let Err(e) = client.post(format!("{base_url}/stop")).send().await {
        warn!("speech: stop failed: {e}");
    }
}

// ─── Log-only output ───────────────────────────────────────────────────────

/// Logs utterances instead of speaking them. Used when no TTS server is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSpeech;

impl SpeechOutput for LogSpeech {
    fn speak(&self, request: SpeechRequest) {
        info!(
            "speak [{} {:?}]: {}",
            request.utterance_id, request.mode, request.text
        );
    }

    fn stop(&self) {
        info!("speak: stop");
    }
}
