mod http;
mod socket;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use zaptv_core::mpv::MpvEngine;
use zaptv_core::{BroadcastMessage, ZapperCore};
use zaptv_proto::config::Config;
use zaptv_proto::protocol::Channel;
use zaptv_proto::state::{fetch_channels_from_url, load_channels_from_m3u, load_channels_from_toml};

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only forward WARN and ERROR to clients to avoid clogging the channel
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();

        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // Send to broadcast channel (ignore errors - no receivers is OK)
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    // Setup file logging + broadcast layer
    let data_dir = zaptv_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,zaptv=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let channels = load_channels(&config).await?;

    // Build the player core: one mpv instance per buffered channel
    let engine = Arc::new(MpvEngine::new());
    let core = ZapperCore::new(
        engine,
        config.prebuffer.clone(),
        channels,
        config.engine.default_volume,
        broadcast_tx.clone(),
    );
    let zapper = core.zapper();
    let state_manager = core.state_manager();
    let core_handle = tokio::spawn(core.run());

    // Client list for socket server shutdown detection
    let clients = Arc::new(RwLock::new(Vec::<socket::ClientHandle>::new()));

    // Start TCP socket server
    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        zaptv_proto::platform::DAEMON_TCP_PORT,
        zapper.clone(),
        state_manager.clone(),
        clients.clone(),
        broadcast_tx.clone(),
    );

    // Start HTTP API if enabled
    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            zapper.clone(),
            state_manager.clone(),
        );
    }

    info!("Daemon initialised, waiting for clients");

    // Run until the last client disconnects (plus a grace period)
    let mut had_clients = false;
    let mut empty_since: Option<tokio::time::Instant> = None;

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let client_count = clients.read().await.len();
        if client_count > 0 {
            had_clients = true;
            empty_since = None;
            continue;
        }

        if !had_clients {
            continue;
        }

        let since = empty_since.get_or_insert_with(tokio::time::Instant::now);
        if since.elapsed() > Duration::from_secs(5) {
            info!("No clients for 5 seconds, shutting down daemon");
            break;
        }
    }

    // Tear the pool down cleanly before exit
    zapper.shutdown().await;
    let _ = core_handle.await;

    Ok(())
}

async fn load_channels(config: &Config) -> anyhow::Result<Vec<Channel>> {
    // 1. Local TOML file (highest priority — rich metadata)
    let toml_path = &config.channels.channels_toml;
    if toml_path.exists() {
        match load_channels_from_toml(toml_path) {
            Ok(channels) => {
                info!(
                    "Loaded {} channels from TOML: {}",
                    channels.len(),
                    toml_path.display()
                );
                return Ok(channels);
            }
            Err(e) => {
                warn!(
                    "Failed to parse TOML channels ({}): {}",
                    toml_path.display(),
                    e
                );
            }
        }
    } else {
        info!(
            "TOML channel file not found ({}), trying m3u",
            toml_path.display()
        );
    }

    // 2. M3U URL or local file from config
    let source = &config.channels.m3u_url;
    if !source.is_empty() {
        if source.starts_with("http://") || source.starts_with("https://") {
            match fetch_channels_from_url(source).await {
                Ok(channels) => {
                    info!("Loaded {} channels from URL", channels.len());
                    return Ok(channels);
                }
                Err(e) => {
                    warn!("Failed to fetch channels from URL ({}): {}", source, e);
                }
            }
        } else {
            let path = PathBuf::from(source);
            if path.exists() {
                match load_channels_from_m3u(&path) {
                    Ok(channels) => {
                        info!("Loaded {} channels from m3u file", channels.len());
                        return Ok(channels);
                    }
                    Err(e) => {
                        warn!("Failed to read m3u file ({}): {}", source, e);
                    }
                }
            }
        }
    }

    // 3. Last-resort: a channels.m3u beside the working directory
    let fallback = PathBuf::from("channels.m3u");
    if fallback.exists() {
        if let Ok(channels) = load_channels_from_m3u(&fallback) {
            info!("Loaded {} channels from local channels.m3u", channels.len());
            return Ok(channels);
        }
    }

    info!("No channel source available, starting with empty list");
    Ok(Vec::new())
}
