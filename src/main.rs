use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use video_chat_rust::api::{ApiServer, AppState};
use video_chat_rust::chat::ChatEngine;
use video_chat_rust::config::Config;
use video_chat_rust::gemini::{GeminiClient, GenerativeModel};
use video_chat_rust::index::SearchIndex;
use video_chat_rust::pipeline::Pipeline;
use video_chat_rust::quota::Scheduler;
use video_chat_rust::storage::VideoStore;
use video_chat_rust::youtube::YoutubeClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "video_chat_rust=info,warn".to_string()),
        )
        .init();

    let matches = Command::new("Video Chat Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Chat with your videos: transcripts, frame search, and quota-aware Gemini access")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML configuration file")
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("ADDR")
                .help("Bind address (overrides the config file)")
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Listen port (overrides the config file)")
        )
        .arg(
            Arg::new("storage-dir")
                .short('s')
                .long("storage-dir")
                .value_name("DIR")
                .help("Video storage directory (overrides the config file)")
        )
        .get_matches();

    // Load configuration, then apply command line overrides
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;

    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }
    if let Some(port) = matches.get_one::<String>("port") {
        config.server.port = port.parse()?;
    }
    if let Some(dir) = matches.get_one::<String>("storage-dir") {
        config.storage.base_dir = PathBuf::from(dir);
    }
    config.validate()?;

    info!("🚀 Video chat server starting...");
    info!("{}", config.summary());

    // Quota scheduler and its queue dispatcher
    let scheduler = Arc::new(Scheduler::new(config.quota.limits()));
    let _dispatcher = scheduler.spawn_dispatcher();

    // Storage, search index, and external clients
    let store = Arc::new(VideoStore::new(config.storage.base_dir.clone()).await?);
    let index = Arc::new(SearchIndex::new(config.storage.base_dir.clone()));
    let youtube = Arc::new(YoutubeClient::new(config.processing.chunk_duration_secs)?);
    let model: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::new(
        config.gemini.clone(),
        Arc::clone(scheduler.tracker()),
    )?);

    if config.gemini.api_key.is_none() {
        warn!("⚠️ Running without a Gemini API key; processing will degrade to offline fallbacks");
    } else {
        let probe = Arc::clone(&model);
        tokio::spawn(async move {
            if probe.is_available().await {
                info!("✅ Gemini API reachable");
            } else {
                warn!("⚠️ Gemini API did not answer the startup probe; calls may fail");
            }
        });
    }

    let chat = Arc::new(ChatEngine::new(
        Arc::clone(&model),
        Arc::clone(&scheduler),
        Arc::clone(&store),
        Arc::clone(&index),
    ));
    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        Arc::clone(&store),
        Arc::clone(&index),
        Arc::clone(&youtube),
        Arc::clone(&model),
        Arc::clone(&scheduler),
    ));

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = AppState {
        store,
        index,
        scheduler,
        chat,
        pipeline,
        youtube,
        config: Arc::new(config),
    };

    let server = ApiServer::new(state, host, port);
    server.start_background().await??;

    Ok(())
}
