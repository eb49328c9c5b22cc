/// ZapperCore: single-owner event loop for all playback state.
///
/// Combines the switch coordinator and the pre-buffer scheduler in one task:
/// commands from [`Zapper`] handles, engine events, the reconcile debounce
/// and the standby creation throttle all arrive through the same
/// `tokio::select!`, so the pool, the channel list and every observable
/// state publication are serialized by construction.  No other task ever
/// touches a [`PlaybackHandle`], so a handle can never be evicted while a
/// hand-off to it is in flight.
///
/// After each mutation the core broadcasts a
/// [`BroadcastMessage::StateUpdated`] so subscribers re-read the snapshot.
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::adjacency::adjacent_indices;
use crate::engine::{
    next_handle_id, EngineEvent, EngineEventKind, MediaEngine, SpawnRequest, SurfaceId,
};
use crate::pool::{HandlePool, PlaybackHandle};
use crate::zapper::{SwitchOutcome, ZapCommand, Zapper};
use crate::BroadcastMessage;
use zaptv_proto::config::PrebufferConfig;
use zaptv_proto::protocol::Channel;
use zaptv_proto::state::StateManager;

/// Placeholder deadline for disabled timer branches; never actually awaited.
const IDLE_PARK: Duration = Duration::from_secs(3600);

pub struct ZapperCore {
    cfg: PrebufferConfig,
    engine: Arc<dyn MediaEngine>,
    state: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    cmd_tx: mpsc::Sender<ZapCommand>,
    cmd_rx: mpsc::Receiver<ZapCommand>,
    /// Engine events come back on this channel; the sender is handed to every
    /// spawned player instance.
    engine_tx: mpsc::Sender<EngineEvent>,
    engine_rx: mpsc::Receiver<EngineEvent>,

    channels: Vec<Channel>,
    /// Index of the current channel in `channels`.
    current: Option<usize>,
    /// Channel id of the handle bound to the surface/audio, if any.
    active: Option<String>,
    /// Whether the user paused the active slot.
    paused: bool,
    surface: Option<SurfaceId>,
    volume: f32,
    muted: bool,

    pool: HandlePool,
    /// Channel ids of the adjacency set from the most recent reconcile.
    adjacent: Vec<String>,
    /// Debounced reconcile deadline; re-armed (not extended) on every switch.
    reconcile_at: Option<Instant>,
    /// Standby handles still to create for the current adjacency set.
    create_queue: VecDeque<Channel>,
    /// Throttle deadline for the next standby creation.
    next_create_at: Option<Instant>,
}

impl ZapperCore {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        cfg: PrebufferConfig,
        channels: Vec<Channel>,
        volume: f32,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (engine_tx, engine_rx) = mpsc::channel(64);
        let state = Arc::new(StateManager::new(channels.clone(), volume));

        Self {
            cfg,
            engine,
            state,
            broadcast_tx,
            cmd_tx,
            cmd_rx,
            engine_tx,
            engine_rx,
            channels,
            current: None,
            active: None,
            paused: false,
            surface: None,
            volume,
            muted: false,
            pool: HandlePool::new(),
            adjacent: Vec::new(),
            reconcile_at: None,
            create_queue: VecDeque::new(),
            next_create_at: None,
        }
    }

    /// A cloneable command handle into this core.
    pub fn zapper(&self) -> Zapper {
        Zapper {
            tx: self.cmd_tx.clone(),
            state: Arc::clone(&self.state),
            broadcast_tx: self.broadcast_tx.clone(),
        }
    }

    /// Borrow the state manager (for use by socket/HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    /// Run the core event loop.  Returns when a `Shutdown` command arrives
    /// or every `Zapper` handle has been dropped.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("ZapperCore: starting event loop");

        loop {
            let reconcile_at = self
                .reconcile_at
                .unwrap_or_else(|| Instant::now() + IDLE_PARK);
            let create_at = self
                .next_create_at
                .unwrap_or_else(|| Instant::now() + IDLE_PARK);

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => {
                            info!("ZapperCore: command channel closed, shutting down");
                            break;
                        }
                        Some(ZapCommand::Shutdown) => {
                            info!("ZapperCore: shutdown requested");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }

                Some(event) = self.engine_rx.recv() => {
                    self.handle_engine_event(event).await;
                }

                _ = sleep_until(reconcile_at), if self.reconcile_at.is_some() => {
                    self.reconcile_at = None;
                    self.run_reconcile().await;
                }

                _ = sleep_until(create_at), if self.next_create_at.is_some() => {
                    self.next_create_at = None;
                    self.create_next_standby();
                    self.publish_prebuffer().await;
                }
            }
        }

        self.do_release().await;
        info!("ZapperCore: event loop exited");
        Ok(())
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: ZapCommand) {
        match cmd {
            ZapCommand::SetChannels(channels) => self.set_channels(channels).await,
            ZapCommand::Play { channel, reply } => {
                let outcome = self.play_channel(channel).await;
                let _ = reply.send(outcome);
            }
            ZapCommand::PlayIndex { index, reply } => {
                let outcome = match self.channels.get(index).cloned() {
                    Some(channel) => self.play_channel(channel).await,
                    None => {
                        warn!("play: index {} out of range", index);
                        SwitchOutcome::NoSuchChannel
                    }
                };
                let _ = reply.send(outcome);
            }
            ZapCommand::Up { reply } => {
                let outcome = self.step(1).await;
                let _ = reply.send(outcome);
            }
            ZapCommand::Down { reply } => {
                let outcome = self.step(-1).await;
                let _ = reply.send(outcome);
            }
            ZapCommand::InstantAvailable { channel_id, reply } => {
                let ready = self
                    .pool
                    .get(&channel_id)
                    .map(|h| h.ready)
                    .unwrap_or(false);
                let _ = reply.send(ready);
            }
            ZapCommand::SetSurface(surface) => {
                self.surface = surface;
                if let Some(active) = &self.active {
                    if let Some(handle) = self.pool.get(active) {
                        handle.player.attach_surface(surface);
                    }
                }
            }
            ZapCommand::SetMuted(muted) => self.set_muted(muted).await,
            ZapCommand::ToggleMute => {
                let muted = !self.muted;
                self.set_muted(muted).await;
            }
            ZapCommand::SetVolume(volume) => {
                self.volume = volume.clamp(0.0, 1.0);
                if let Some(active) = &self.active {
                    if let Some(handle) = self.pool.get(active) {
                        handle.player.set_volume(self.volume);
                    }
                }
                self.state.set_volume(self.volume).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            ZapCommand::Pause => {
                if let Some(active) = &self.active {
                    if let Some(handle) = self.pool.get(active) {
                        handle.player.set_paused(true);
                    }
                    self.paused = true;
                    self.state
                        .set_status(zaptv_proto::protocol::PlaybackStatus::Paused)
                        .await;
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                }
            }
            ZapCommand::Resume => {
                if let Some(active) = self.active.clone() {
                    let ready = match self.pool.get(&active) {
                        Some(handle) => {
                            handle.player.set_paused(false);
                            handle.ready
                        }
                        None => false,
                    };
                    self.paused = false;
                    let status = if ready {
                        zaptv_proto::protocol::PlaybackStatus::Playing
                    } else {
                        zaptv_proto::protocol::PlaybackStatus::Buffering
                    };
                    self.state.set_status(status).await;
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                }
            }
            ZapCommand::Stop => {
                if let Some(active) = self.active.take() {
                    info!("stop: releasing active handle for '{}'", active);
                    self.pool.evict(&active);
                }
                self.paused = false;
                self.state
                    .set_status(zaptv_proto::protocol::PlaybackStatus::Idle)
                    .await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            ZapCommand::Stats { reply } => {
                let _ = reply.send(self.pool.stats(self.active.as_deref()));
            }
            ZapCommand::Release => self.do_release().await,
            // Handled in run(); listed here so the match stays exhaustive.
            ZapCommand::Shutdown => {}
        }
    }

    async fn set_channels(&mut self, channels: Vec<Channel>) {
        info!("channel list replaced ({} channels)", channels.len());
        self.channels = channels;
        // Keep the active channel current if it survived the replacement.
        self.current = self.active.as_ref().and_then(|active| {
            self.channels.iter().position(|c| &c.id == active)
        });
        self.state
            .set_channels(self.channels.clone(), self.current)
            .await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        self.cancel_reconcile();
        self.schedule_reconcile();
    }

    async fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(active) = &self.active {
            if let Some(handle) = self.pool.get(active) {
                handle.player.set_muted(muted);
            }
        }
        self.state.set_muted(muted).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn step(&mut self, delta: i32) -> SwitchOutcome {
        if self.channels.is_empty() {
            return SwitchOutcome::NoSuchChannel;
        }
        let len = self.channels.len();
        let current = self.current.unwrap_or(0);
        let next = if delta >= 0 {
            (current + 1) % len
        } else {
            (current + len - 1) % len
        };
        self.play_channel(self.channels[next].clone()).await
    }

    // ── switch coordinator ────────────────────────────────────────────────────

    async fn play_channel(&mut self, channel: Channel) -> SwitchOutcome {
        if channel.url.trim().is_empty() {
            warn!("play: no stream available for '{}'", channel.name);
            self.state
                .set_error(format!("no stream available for '{}'", channel.name))
                .await;
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            return SwitchOutcome::NoStream;
        }

        // Only the newest switch intent survives: drop the pending reconcile
        // and any queued standby creations before touching the pool.
        self.cancel_reconcile();

        self.current = self.channels.iter().position(|c| c.id == channel.id);

        let instant = self
            .pool
            .get(&channel.id)
            .map(|h| h.ready)
            .unwrap_or(false);

        // Demote the outgoing active handle.  It stays pooled, muted and
        // paused, so an immediate back-switch is instant; the next reconcile
        // decides whether it survives.
        if let Some(old_id) = self.active.clone() {
            if old_id != channel.id {
                if let Some(old) = self.pool.get_mut(&old_id) {
                    old.player.set_muted(true);
                    old.player.set_paused(true);
                    old.player.attach_surface(None);
                }
            }
        }

        if !self.pool.contains(&channel.id) {
            info!("play: cold start for '{}'", channel.name);
            let handle = self.spawn_handle(&channel, true);
            self.pool.put(handle);
        } else if instant {
            info!("play: instant switch to '{}'", channel.name);
        } else {
            info!("play: promoting still-buffering handle for '{}'", channel.name);
        }

        // Promote: surface, volume and audio are exclusive to the active
        // handle, and the demote above already ran on this same task.
        let surface = self.surface;
        let muted = self.muted;
        let volume = self.volume;
        let ready = match self.pool.get_mut(&channel.id) {
            Some(handle) => {
                handle.player.attach_surface(surface);
                handle.player.set_volume(volume);
                handle.player.set_muted(muted);
                handle.player.set_paused(false);
                handle.ready
            }
            None => false,
        };

        self.active = Some(channel.id.clone());
        self.paused = false;
        self.state.set_switching(self.current, !ready).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        let _ = self.broadcast_tx.send(BroadcastMessage::Switched {
            channel_id: channel.id.clone(),
            instant,
        });

        self.schedule_reconcile();
        self.publish_prebuffer().await;

        if instant {
            SwitchOutcome::Instant
        } else {
            SwitchOutcome::Cold
        }
    }

    // ── engine events ─────────────────────────────────────────────────────────

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        // A channel can be evicted and re-spawned; only the live instance's
        // events count.
        let live = self
            .pool
            .get(&event.channel_id)
            .map(|h| h.id == event.handle)
            .unwrap_or(false);
        if !live {
            debug!(
                "engine event for stale handle {} ('{}') ignored",
                event.handle, event.channel_id
            );
            return;
        }

        match event.kind {
            EngineEventKind::Ready => {
                let handle = match self.pool.get_mut(&event.channel_id) {
                    Some(h) => h,
                    None => return,
                };
                if handle.ready {
                    return; // ready transitions at most once
                }
                handle.ready = true;
                debug!("'{}' is buffered (handle {})", event.channel_id, event.handle);

                if self.active.as_deref() == Some(event.channel_id.as_str()) {
                    let status = if self.paused {
                        zaptv_proto::protocol::PlaybackStatus::Paused
                    } else {
                        zaptv_proto::protocol::PlaybackStatus::Playing
                    };
                    self.state.set_status(status).await;
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                }
                self.publish_prebuffer().await;
            }

            EngineEventKind::Failed(message) => {
                let was_active = self.active.as_deref() == Some(event.channel_id.as_str());
                self.pool.evict(&event.channel_id);

                if was_active {
                    warn!("active stream '{}' failed: {}", event.channel_id, message);
                    self.active = None;
                    self.paused = false;
                    self.state.set_error(message).await;
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                } else {
                    // Speculative buffering failures are absorbed silently:
                    // evicted, not retried, never user-visible.
                    debug!(
                        "standby buffer for '{}' failed: {} (evicted)",
                        event.channel_id, message
                    );
                }
                self.publish_prebuffer().await;
            }
        }
    }

    // ── pre-buffer scheduler ──────────────────────────────────────────────────

    fn schedule_reconcile(&mut self) {
        self.reconcile_at = Some(Instant::now() + self.cfg.debounce());
    }

    fn cancel_reconcile(&mut self) {
        self.reconcile_at = None;
        self.next_create_at = None;
        self.create_queue.clear();
    }

    /// One reconciliation cycle: recompute adjacency from the *current*
    /// index, evict everything outside adjacency ∪ {active}, then start
    /// creating the missing standby buffers (throttled).
    async fn run_reconcile(&mut self) {
        let mut keep: HashSet<String> = HashSet::new();
        if let Some(active) = &self.active {
            keep.insert(active.clone());
        }

        let mut targets: Vec<Channel> = Vec::new();
        if let Some(current) = self.current {
            for idx in adjacent_indices(self.channels.len(), current, self.cfg.buffer_count) {
                targets.push(self.channels[idx].clone());
            }
        }
        self.adjacent = targets.iter().map(|c| c.id.clone()).collect();
        for channel in &targets {
            keep.insert(channel.id.clone());
        }

        // Eviction strictly precedes creation within a cycle, so the pool
        // never exceeds its bound by more than the handles already in flight.
        let evicted = self.pool.reconcile(&keep);
        debug!(
            "reconcile: adjacency {:?}, evicted {}",
            self.adjacent, evicted
        );

        self.create_queue = targets
            .into_iter()
            .filter(|c| !self.pool.contains(&c.id))
            .filter(|c| {
                if c.url.trim().is_empty() {
                    debug!("prebuffer: skipping '{}' (no stream url)", c.name);
                    false
                } else {
                    true
                }
            })
            .collect();

        self.next_create_at = None;
        if !self.create_queue.is_empty() {
            self.create_next_standby();
        }
        self.publish_prebuffer().await;
    }

    /// Create one queued standby handle and re-arm the throttle timer for
    /// the rest.
    fn create_next_standby(&mut self) {
        while let Some(channel) = self.create_queue.pop_front() {
            if self.pool.contains(&channel.id) {
                continue;
            }
            debug!("prebuffer: creating standby for '{}'", channel.name);
            let handle = self.spawn_handle(&channel, false);
            self.pool.put(handle);
            break;
        }
        self.next_create_at = if self.create_queue.is_empty() {
            None
        } else {
            Some(Instant::now() + self.cfg.spacing())
        };
    }

    fn spawn_handle(&self, channel: &Channel, main: bool) -> PlaybackHandle {
        let id = next_handle_id();
        let player = self.engine.spawn(SpawnRequest {
            handle: id,
            channel_id: channel.id.clone(),
            url: channel.url.clone(),
            main,
            limit_quality: !main && self.cfg.limit_standby_quality,
            events: self.engine_tx.clone(),
        });
        PlaybackHandle {
            id,
            channel_id: channel.id.clone(),
            url: channel.url.clone(),
            created_as_main: main,
            ready: false,
            player,
        }
    }

    /// Publish which adjacent channels are switchable instantly right now.
    async fn publish_prebuffer(&self) {
        let ready: Vec<String> = self
            .adjacent
            .iter()
            .filter(|id| Some(id.as_str()) != self.active.as_deref())
            .filter(|id| self.pool.get(id).map(|h| h.ready).unwrap_or(false))
            .cloned()
            .collect();
        self.state.set_prebuffered(ready).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    // ── teardown ──────────────────────────────────────────────────────────────

    /// Cancel all in-flight work, release every handle (active included) and
    /// reset the observable state.  Idempotent.
    async fn do_release(&mut self) {
        if !self.pool.is_empty() {
            info!("release: tearing down {} handle(s)", self.pool.len());
        }
        self.cancel_reconcile();
        self.pool.clear();
        self.active = None;
        self.current = None;
        self.paused = false;
        self.adjacent.clear();
        self.state.reset_playback().await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}
