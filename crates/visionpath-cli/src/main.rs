//! visionpath CLI — response relay server and client.
//!
//! ```text
//! visionpath serve [--config relay.toml] [--port 2004] [--speech-url http://localhost:2003]
//! visionpath respond "Stop now. Turn left." [--mode navigation] [--append]
//! visionpath frame photo.jpg [--mode reading]
//! visionpath mode / chat / narrate / hear / blind-mode / status [--server ...]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use visionpath_lib::config::{AppConfig, API_KEY_ENV};
use visionpath_lib::connectivity::{ConnectivityMonitor, TcpProbe};
use visionpath_lib::generation::{ChatService, GeminiChat, GeminiClient, GenerationService};
use visionpath_lib::pipeline;
use visionpath_lib::server::{self, AppState, Prompts};
use visionpath_lib::session::Session;
use visionpath_lib::speech::{HttpSpeech, LogSpeech, SpeechOutput};
use visionpath_lib::visionpath_core::types::Mode;

const DEFAULT_SERVER: &str = "http://localhost:2004";

/// visionpath — speaks scene descriptions for blind navigation
#[derive(Parser)]
#[command(name = "visionpath", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the relay server
    Serve {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen host
        #[arg(long)]
        host: Option<String>,
        /// Listen port
        #[arg(long)]
        port: Option<u16>,
        /// TTS server URL (empty to only log speech)
        #[arg(long)]
        speech_url: Option<String>,
        /// Gemini model
        #[arg(long)]
        model: Option<String>,
        /// Gemini API key
        #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
        api_key: Option<String>,
        /// Start in blind mode without the spoken onboarding
        #[arg(long)]
        no_onboarding: bool,
    },
    /// Switch the active mode
    Mode {
        mode: Mode,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Set (or append to) a mode's response text
    Respond {
        text: String,
        #[arg(long, default_value = "navigation")]
        mode: Mode,
        /// Append as a streamed chunk instead of replacing
        #[arg(long)]
        append: bool,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Send a camera frame for analysis
    Frame {
        image: PathBuf,
        #[arg(long, default_value = "navigation")]
        mode: Mode,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Ask the assistant a question
    Chat {
        message: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Speak the active mode's text
    Narrate {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Deliver a recognized transcript as if it had been heard
    Hear {
        transcript: String,
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Skip onboarding (same as a double tap)
    BlindMode {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
    /// Get session status
    Status {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "visionpath=info,visionpath_lib=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            speech_url,
            model,
            api_key,
            no_onboarding,
        } => {
            let mut config = AppConfig::load(config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(url) = speech_url {
                config.speech.url = url;
            }
            if let Some(model) = model {
                config.generation.model = model;
            }
            if let Some(key) = api_key {
                config.generation.api_key = key;
            }
            if no_onboarding {
                config.relay.onboarding = false;
            }
            config.validate()?;
            serve(config).await?;
        }

        Command::Mode { mode, server } => {
            post_json(&server, "mode", json!({ "mode": mode })).await?;
        }

        Command::Respond {
            text,
            mode,
            append,
            server,
        } => {
            if append {
                post_json(&server, "response/chunk", json!({ "mode": mode, "text": text })).await?;
            } else {
                post_json(&server, "response", json!({ "mode": mode, "text": text })).await?;
            }
        }

        Command::Frame {
            image,
            mode,
            server,
        } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("failed to read {}", image.display()))?;
            let resp = reqwest::Client::new()
                .post(format!("{server}/frame?mode={mode}"))
                .header(reqwest::header::CONTENT_TYPE, mime_type(&image))
                .body(bytes)
                .send()
                .await
                .context("request failed")?;
            print_response(resp).await?;
        }

        Command::Chat { message, server } => {
            post_json(&server, "chat", json!({ "message": message })).await?;
        }

        Command::Narrate { server } => post_simple(&server, "narrate").await?,

        Command::Hear { transcript, server } => {
            post_json(&server, "voice/event", json!({ "event": "listenStarted" })).await?;
            post_json(
                &server,
                "voice/event",
                json!({ "event": "resultsReceived", "transcript": transcript }),
            )
            .await?;
        }

        Command::BlindMode { server } => post_simple(&server, "blind-mode").await?,

        Command::Status { server } => {
            let resp = reqwest::Client::new()
                .get(format!("{server}/status"))
                .send()
                .await
                .context("request failed")?;
            print_response(resp).await?;
        }
    }

    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    if config.generation.api_key.is_empty() {
        warn!("no API key (set {API_KEY_ENV}); frame and chat requests will fail");
    }

    let probe = Arc::new(TcpProbe::new(
        config.connectivity.probe_addr.clone(),
        config.connectivity.timeout(),
    ));
    let monitor = ConnectivityMonitor::start(probe, config.relay.connectivity_interval()).await;

    let speech: Arc<dyn SpeechOutput> = if config.speech.url.trim().is_empty() {
        info!("no speech server configured, logging utterances");
        Arc::new(LogSpeech)
    } else {
        info!("speech server at {}", config.speech.url);
        Arc::new(HttpSpeech::new(config.speech.url.clone()))
    };

    let generator: Arc<dyn GenerationService> = Arc::new(GeminiClient::new(&config.generation));
    let chat: Arc<dyn ChatService> = Arc::new(GeminiChat::new(&config.generation));

    let mut session = Session::start(config.relay.clone(), speech, monitor.subscribe());
    if let Some(events) = session.take_events() {
        tokio::spawn(pipeline::drive_events(events, session.handle(), chat.clone()));
    }

    let app = server::router(AppState {
        session: session.handle(),
        generator,
        chat,
        prompts: Arc::new(Prompts::from(&config.generation)),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("visionpath listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    session.shutdown().await;
    drop(monitor);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

async fn post_json(server: &str, endpoint: &str, body: serde_json::Value) -> anyhow::Result<()> {
    let resp = reqwest::Client::new()
        .post(format!("{server}/{endpoint}"))
        .json(&body)
        .send()
        .await
        .context("request failed")?;
    print_response(resp).await
}

async fn post_simple(server: &str, endpoint: &str) -> anyhow::Result<()> {
    let resp = reqwest::Client::new()
        .post(format!("{server}/{endpoint}"))
        .send()
        .await
        .context("request failed")?;
    print_response(resp).await
}

async fn print_response(resp: reqwest::Response) -> anyhow::Result<()> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    println!("{body}");
    if !status.is_success() {
        bail!("server returned {status}");
    }
    Ok(())
}
