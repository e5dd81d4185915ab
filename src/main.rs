//! pdf-assistant: ask questions about a PDF, answered by Gemini, optionally read aloud.

mod api;
mod assistant;
mod config;
mod extractor;
mod generator;
mod markdown;
mod pages;
mod speech;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::speech::kokoro::KokoroEngine;
use crate::speech::{SpeechEngine, SpeechOptions, SpeechSessions};

#[derive(Parser, Debug)]
#[command(name = "pdf-assistant", about = "Question answering over uploaded PDFs")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Start without loading the speech engine
    #[arg(long)]
    no_speech: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Suppress noisy ort internals
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("pdf-assistant starting");

    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let mut config = config::Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.no_speech {
        config.speech.enabled = false;
    }

    let api_key = config.gemini.api_key()?;

    std::fs::create_dir_all(&config.uploads.dir)?;

    info!("Gemini model: {}", config.gemini.model);
    let generator = generator::GeminiGenerator::new(config.gemini.clone(), api_key)?;
    let assistant = assistant::Assistant::new(
        Arc::new(extractor::LopdfExtractor),
        Arc::new(generator),
        config.uploads.dir.clone(),
    );
    info!("Uploads stored in {}", assistant.uploads_dir().display());

    let speech = if config.speech.enabled {
        info!("Loading Kokoro TTS model...");
        let speech_config = config.speech.clone();
        match tokio::task::spawn_blocking(move || KokoroEngine::load(&speech_config)).await? {
            Ok(engine) => {
                let engine: Arc<dyn SpeechEngine> = Arc::new(engine);
                let defaults = SpeechOptions {
                    rate: config.speech.rate,
                    voice_index: config.speech.voice_index,
                };
                Some(Arc::new(SpeechSessions::new(engine, defaults)))
            }
            Err(e) => {
                warn!("Failed to load TTS model: {e}");
                info!("Speech disabled, continuing without read-aloud");
                None
            }
        }
    } else {
        info!("Speech disabled by configuration");
        None
    };

    let state = api::AppState {
        assistant: Arc::new(assistant),
        speech,
        departments: Arc::new(config.departments.clone()),
    };
    let app = api::router(state, config.uploads.max_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    api::serve(app, &addr).await?;

    Ok(())
}
