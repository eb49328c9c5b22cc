/// Media engine seam.
///
/// The player core never talks to a decoder directly: it asks a
/// [`MediaEngine`] to spawn one player instance per stream and then drives
/// that instance through the fire-and-forget [`EnginePlayer`] commands.
/// Everything the engine wants to tell the core comes back as an
/// [`EngineEvent`] on the channel supplied at spawn time, so the core loop
/// stays the single owner of all player state.
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

// ── handle identity ───────────────────────────────────────────────────────────

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-global identity of one spawned player instance.  A channel can be
/// evicted and re-spawned; the id lets the core discard events from the dead
/// instance.
pub type HandleId = u64;

pub fn next_handle_id() -> HandleId {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}

// ── surface ───────────────────────────────────────────────────────────────────

/// Opaque identifier of the render surface (window id, texture id, whatever
/// the embedding UI hands over).  The core only guarantees exclusivity: at
/// most one player instance is attached at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceId(pub u64);

// ── spawn request / events ────────────────────────────────────────────────────

/// Everything an engine needs to bring up one player instance.
pub struct SpawnRequest {
    pub handle: HandleId,
    pub channel_id: String,
    pub url: String,
    /// True when this instance is being created to go on air immediately
    /// (cold switch) rather than as a speculative standby buffer.
    pub main: bool,
    /// Cap bitrate / skip video decode until promoted.  Only ever set for
    /// standby instances.
    pub limit_quality: bool,
    /// Where readiness and failure land.  The sender is owned by the core
    /// loop; events carry `handle` so stale instances can be filtered out.
    pub events: mpsc::Sender<EngineEvent>,
}

#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub handle: HandleId,
    pub channel_id: String,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone)]
pub enum EngineEventKind {
    /// Enough data is buffered to start (or sustain) playback.  Sent at most
    /// once per instance.
    Ready,
    /// The instance is unusable: connect failure, stream error, or the
    /// engine refusing to create another decoder.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("player binary not found")]
    BinaryNotFound,
    #[error("IPC endpoint did not appear")]
    IpcUnavailable,
    #[error("engine error: {0}")]
    Other(String),
}

// ── traits ────────────────────────────────────────────────────────────────────

/// Factory for player instances.  `spawn` must return without blocking:
/// connection and buffering proceed on the engine's own tasks and are
/// reported through [`EngineEvent`]s.
pub trait MediaEngine: Send + Sync + 'static {
    fn spawn(&self, request: SpawnRequest) -> Box<dyn EnginePlayer>;
}

/// One live player instance.  All commands are fire-and-forget so the core
/// loop never blocks on engine IO; `release` must be idempotent and safe
/// even when the instance never reached readiness or was never attached to
/// a surface.
pub trait EnginePlayer: Send + Sync {
    fn set_paused(&self, paused: bool);
    fn set_muted(&self, muted: bool);
    /// Volume in `0.0..=1.0`.
    fn set_volume(&self, volume: f32);
    fn attach_surface(&self, surface: Option<SurfaceId>);
    fn release(&mut self);
}
