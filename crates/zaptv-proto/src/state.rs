use crate::protocol::{Channel, PlaybackStatus, PlayerState};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Single-writer holder of the observable [`PlayerState`].
///
/// The player core is the only writer; the socket and HTTP layers read
/// snapshots.  Every mutation bumps `rev` so clients can detect missed
/// updates after a broadcast lag.
pub struct StateManager {
    state: Arc<RwLock<PlayerState>>,
}

impl StateManager {
    pub fn new(channels: Vec<Channel>, volume: f32) -> Self {
        let state = PlayerState {
            rev: 1,
            channels,
            current_channel: None,
            volume,
            muted: false,
            is_playing: false,
            is_buffering: false,
            playback_status: PlaybackStatus::Idle,
            error: None,
            instant_switch_ready: false,
            prebuffered_channels: Vec::new(),
        };

        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn arc(&self) -> Arc<RwLock<PlayerState>> {
        Arc::clone(&self.state)
    }

    pub async fn get_state(&self) -> PlayerState {
        self.state.read().await.clone()
    }

    /// Replace the channel list wholesale.  `current` is the index of the
    /// previously active channel in the *new* list, if it survived.
    pub async fn set_channels(&self, channels: Vec<Channel>, current: Option<usize>) {
        let mut state = self.state.write().await;
        state.channels = channels;
        state.current_channel = current;
        state.rev += 1;
    }

    /// A switch has been issued: the target is the current channel and the
    /// previous error (if any) is cleared.
    pub async fn set_switching(&self, index: Option<usize>, buffering: bool) {
        let mut state = self.state.write().await;
        state.current_channel = index;
        state.is_playing = true;
        state.is_buffering = buffering;
        state.playback_status = if buffering {
            PlaybackStatus::Buffering
        } else {
            PlaybackStatus::Playing
        };
        state.error = None;
        state.rev += 1;
    }

    pub async fn set_status(&self, status: PlaybackStatus) {
        let mut state = self.state.write().await;
        state.is_playing = matches!(
            status,
            PlaybackStatus::Playing | PlaybackStatus::Paused | PlaybackStatus::Buffering
        );
        state.is_buffering = status == PlaybackStatus::Buffering;
        state.playback_status = status;
        state.rev += 1;
    }

    /// Surface a failure of the active channel slot.  Standby failures never
    /// come through here.
    pub async fn set_error(&self, message: String) {
        let mut state = self.state.write().await;
        state.is_playing = false;
        state.is_buffering = false;
        state.playback_status = PlaybackStatus::Error;
        state.error = Some(message);
        state.rev += 1;
    }

    pub async fn set_volume(&self, volume: f32) {
        let mut state = self.state.write().await;
        state.volume = volume.clamp(0.0, 1.0);
        state.rev += 1;
    }

    pub async fn set_muted(&self, muted: bool) {
        let mut state = self.state.write().await;
        state.muted = muted;
        state.rev += 1;
    }

    /// Publish the set of adjacent channels whose standby buffers are ready.
    pub async fn set_prebuffered(&self, channel_ids: Vec<String>) {
        let mut state = self.state.write().await;
        state.instant_switch_ready = !channel_ids.is_empty();
        state.prebuffered_channels = channel_ids;
        state.rev += 1;
    }

    /// Reset everything playback-related to its initial value.  The channel
    /// list, volume and mute flag survive; they are inputs, not outcomes.
    pub async fn reset_playback(&self) {
        let mut state = self.state.write().await;
        state.current_channel = None;
        state.is_playing = false;
        state.is_buffering = false;
        state.playback_status = PlaybackStatus::Idle;
        state.error = None;
        state.instant_switch_ready = false;
        state.prebuffered_channels.clear();
        state.rev += 1;
    }
}

// ── M3U channel loader ────────────────────────────────────────────────────────

/// Parse an IPTV-style M3U playlist.  `#EXTINF` attribute pairs
/// (`tvg-id`, `tvg-logo`, `group-title`) become channel metadata; the id
/// falls back to the display name when no `tvg-id` is present.
pub fn parse_m3u_from_str(content: &str) -> anyhow::Result<Vec<Channel>> {
    let mut channels = Vec::new();
    let mut pending: Option<(String, String, String, String)> = None; // name, id, logo, group

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let name = rest
                .rfind(',')
                .map(|i| rest[i + 1..].trim().to_string())
                .unwrap_or_default();
            let id = extinf_attr(rest, "tvg-id").unwrap_or_default();
            let logo = extinf_attr(rest, "tvg-logo").unwrap_or_default();
            let group = extinf_attr(rest, "group-title").unwrap_or_default();
            pending = Some((name, id, logo, group));
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let (name, id, logo, group) = pending.take().unwrap_or_default();
        let name = if name.is_empty() { url.clone() } else { name };
        let id = if id.is_empty() { name.clone() } else { id };

        channels.push(Channel {
            id,
            name,
            url,
            group,
            logo,
        });
    }

    debug!("parsed {} channels from m3u", channels.len());
    Ok(channels)
}

/// Extract a quoted `key="value"` attribute from an `#EXTINF` line.
fn extinf_attr(line: &str, key: &str) -> Option<String> {
    let marker = format!("{}=\"", key);
    let start = line.find(&marker)? + marker.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}

pub fn load_channels_from_m3u(path: &std::path::Path) -> anyhow::Result<Vec<Channel>> {
    let content = std::fs::read_to_string(path)?;
    parse_m3u_from_str(&content)
}

pub async fn fetch_channels_from_url(url: &str) -> anyhow::Result<Vec<Channel>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    parse_m3u_from_str(&text)
}

// ── TOML channel loader ───────────────────────────────────────────────────────

/// Intermediate struct that matches the TOML `[[channel]]` table.
/// We keep this separate from `Channel` so the TOML schema can diverge from
/// the wire protocol struct without breaking either.
#[derive(Debug, serde::Deserialize)]
struct TomlChannelFile {
    channel: Vec<TomlChannel>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlChannel {
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    logo: String,
}

pub fn load_channels_from_toml(path: &std::path::Path) -> anyhow::Result<Vec<Channel>> {
    let content = std::fs::read_to_string(path)?;
    parse_channels_from_toml_str(&content)
}

pub fn parse_channels_from_toml_str(content: &str) -> anyhow::Result<Vec<Channel>> {
    let file: TomlChannelFile = toml::from_str(content)?;
    let channels = file
        .channel
        .into_iter()
        .map(|c| Channel {
            id: if c.id.is_empty() { c.name.clone() } else { c.id },
            name: c.name,
            url: c.url,
            group: c.group,
            logo: c.logo,
        })
        .collect();
    Ok(channels)
}
