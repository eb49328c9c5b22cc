//! Behavioural tests for the switch coordinator + pre-buffer scheduler,
//! driven through a mock engine and tokio's paused clock.
//!
//! The mock records every spawn and every player command, and lets the test
//! deliver readiness/failure events exactly when it wants them, so instant
//! vs cold switches, debounce cancellation and failure isolation can all be
//! asserted without a real decoder.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use zaptv_core::engine::{
    EngineEvent, EngineEventKind, EnginePlayer, HandleId, MediaEngine, SpawnRequest, SurfaceId,
};
use zaptv_core::{SwitchOutcome, Zapper, ZapperCore};
use zaptv_proto::config::PrebufferConfig;
use zaptv_proto::protocol::{Channel, PlaybackStatus};
use zaptv_proto::state::StateManager;

// ── mock engine ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum PlayerCmd {
    Paused(bool),
    Muted(bool),
    Volume(f32),
    Surface(Option<u64>),
    Released,
}

struct SpawnRecord {
    handle: HandleId,
    channel_id: String,
    main: bool,
    limit_quality: bool,
    events: mpsc::Sender<EngineEvent>,
    commands: Arc<Mutex<Vec<PlayerCmd>>>,
}

impl SpawnRecord {
    fn released(&self) -> bool {
        self.commands.lock().unwrap().contains(&PlayerCmd::Released)
    }
}

#[derive(Clone, Default)]
struct MockEngine {
    spawns: Arc<Mutex<Vec<SpawnRecord>>>,
}

impl MockEngine {
    fn spawn_count(&self) -> usize {
        self.spawns.lock().unwrap().len()
    }

    fn spawns_for(&self, channel_id: &str) -> usize {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.channel_id == channel_id)
            .count()
    }

    /// Channel ids spawned as standby (non-main) buffers, deduplicated.
    fn standby_channels(&self) -> HashSet<String> {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.main)
            .map(|s| s.channel_id.clone())
            .collect()
    }

    fn latest(&self, channel_id: &str) -> (HandleId, mpsc::Sender<EngineEvent>) {
        let spawns = self.spawns.lock().unwrap();
        let record = spawns
            .iter()
            .rev()
            .find(|s| s.channel_id == channel_id)
            .unwrap_or_else(|| panic!("no spawn recorded for '{}'", channel_id));
        (record.handle, record.events.clone())
    }

    fn latest_released(&self, channel_id: &str) -> bool {
        let spawns = self.spawns.lock().unwrap();
        spawns
            .iter()
            .rev()
            .find(|s| s.channel_id == channel_id)
            .map(|s| s.released())
            .unwrap_or_else(|| panic!("no spawn recorded for '{}'", channel_id))
    }

    fn latest_commands(&self, channel_id: &str) -> Vec<PlayerCmd> {
        let spawns = self.spawns.lock().unwrap();
        spawns
            .iter()
            .rev()
            .find(|s| s.channel_id == channel_id)
            .map(|s| s.commands.lock().unwrap().clone())
            .unwrap_or_default()
    }

    fn mark_ready(&self, channel_id: &str) {
        let (handle, events) = self.latest(channel_id);
        events
            .try_send(EngineEvent {
                handle,
                channel_id: channel_id.to_string(),
                kind: EngineEventKind::Ready,
            })
            .expect("event channel full");
    }

    fn fail(&self, channel_id: &str, message: &str) {
        let (handle, events) = self.latest(channel_id);
        events
            .try_send(EngineEvent {
                handle,
                channel_id: channel_id.to_string(),
                kind: EngineEventKind::Failed(message.to_string()),
            })
            .expect("event channel full");
    }
}

struct MockPlayer {
    commands: Arc<Mutex<Vec<PlayerCmd>>>,
}

impl MockPlayer {
    fn log(&self, cmd: PlayerCmd) {
        self.commands.lock().unwrap().push(cmd);
    }
}

impl EnginePlayer for MockPlayer {
    fn set_paused(&self, paused: bool) {
        self.log(PlayerCmd::Paused(paused));
    }
    fn set_muted(&self, muted: bool) {
        self.log(PlayerCmd::Muted(muted));
    }
    fn set_volume(&self, volume: f32) {
        self.log(PlayerCmd::Volume(volume));
    }
    fn attach_surface(&self, surface: Option<SurfaceId>) {
        self.log(PlayerCmd::Surface(surface.map(|s| s.0)));
    }
    fn release(&mut self) {
        self.log(PlayerCmd::Released);
    }
}

impl MediaEngine for MockEngine {
    fn spawn(&self, request: SpawnRequest) -> Box<dyn EnginePlayer> {
        let commands = Arc::new(Mutex::new(Vec::new()));
        self.spawns.lock().unwrap().push(SpawnRecord {
            handle: request.handle,
            channel_id: request.channel_id,
            main: request.main,
            limit_quality: request.limit_quality,
            events: request.events,
            commands: commands.clone(),
        });
        Box::new(MockPlayer { commands })
    }
}

// ── helpers ───────────────────────────────────────────────────────────────────

fn channel_list(n: usize) -> Vec<Channel> {
    (0..n)
        .map(|i| Channel {
            id: format!("ch{}", i),
            name: format!("Channel {}", i),
            url: format!("http://stream.example/{}.m3u8", i),
            ..Default::default()
        })
        .collect()
}

fn start(n: usize) -> (Zapper, MockEngine, Arc<StateManager>) {
    let engine = MockEngine::default();
    let (broadcast_tx, _) = broadcast::channel(64);
    let core = ZapperCore::new(
        Arc::new(engine.clone()),
        PrebufferConfig::default(),
        channel_list(n),
        0.5,
        broadcast_tx,
    );
    let zapper = core.zapper();
    let state = core.state_manager();
    tokio::spawn(core.run());
    (zapper, engine, state)
}

/// Let the core loop drain pending events (paused clock advances for us).
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Past the reconcile debounce plus the whole standby creation ramp.
async fn settle_prebuffer() {
    tokio::time::sleep(Duration::from_millis(1200)).await;
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cold_switch_creates_one_handle_and_buffers() {
    let (zapper, engine, state) = start(6);

    let outcome = zapper.play_index(2).await.unwrap();
    assert_eq!(outcome, SwitchOutcome::Cold);
    assert_eq!(engine.spawns_for("ch2"), 1);

    let snapshot = state.get_state().await;
    assert!(snapshot.is_playing);
    assert!(snapshot.is_buffering);
    assert_eq!(snapshot.playback_status, PlaybackStatus::Buffering);
    assert_eq!(snapshot.current_channel, Some(2));

    engine.mark_ready("ch2");
    settle().await;

    let snapshot = state.get_state().await;
    assert!(!snapshot.is_buffering);
    assert_eq!(snapshot.playback_status, PlaybackStatus::Playing);
    // Still exactly one handle for the channel; readiness is not a respawn
    assert_eq!(engine.spawns_for("ch2"), 1);
}

#[tokio::test(start_paused = true)]
async fn adjacent_channels_prebuffer_after_debounce() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;

    // Adjacency of 2 with buffer_count=2 is {3, 1, 4, 0}
    let expected: HashSet<String> = ["ch3", "ch1", "ch4", "ch0"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(engine.standby_channels(), expected);

    engine.mark_ready("ch3");
    engine.mark_ready("ch1");
    settle().await;

    let snapshot = state.get_state().await;
    assert!(snapshot.instant_switch_ready);
    let prebuffered: HashSet<String> = snapshot.prebuffered_channels.into_iter().collect();
    assert_eq!(
        prebuffered,
        ["ch3", "ch1"].iter().map(|s| s.to_string()).collect()
    );
}

#[tokio::test(start_paused = true)]
async fn instant_switch_keeps_previous_handle_pooled() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;
    engine.mark_ready("ch3");
    settle().await;

    assert!(zapper.instant_switch_available("ch3").await.unwrap());

    let outcome = zapper.play_index(3).await.unwrap();
    assert_eq!(outcome, SwitchOutcome::Instant);

    // No buffering phase: the promoted handle was already ready
    let snapshot = state.get_state().await;
    assert!(snapshot.is_playing);
    assert!(!snapshot.is_buffering);
    assert_eq!(snapshot.playback_status, PlaybackStatus::Playing);
    assert_eq!(snapshot.current_channel, Some(3));

    // Exactly one spawn for ch3: no second handle was created for the switch
    assert_eq!(engine.spawns_for("ch3"), 1);

    // The outgoing active handle was demoted, not released
    assert!(!engine.latest_released("ch2"));
    let ch2_cmds = engine.latest_commands("ch2");
    assert!(ch2_cmds.contains(&PlayerCmd::Muted(true)));
    assert!(ch2_cmds.contains(&PlayerCmd::Paused(true)));

    let stats = zapper.stats().await.unwrap();
    assert_eq!(stats.active_channel.as_deref(), Some("ch3"));
    assert!(stats.ready_channels.contains(&"ch2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn reconcile_bounds_pool_to_adjacency_plus_active() {
    let (zapper, engine, _state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;
    engine.mark_ready("ch3");
    settle().await;

    zapper.play_index(3).await.unwrap();
    settle_prebuffer().await;

    // keep set is adjacency(3) ∪ {active} = {ch4, ch2, ch5, ch1, ch3}
    let stats = zapper.stats().await.unwrap();
    assert!(stats.pool_size <= 5);
    // ch0 was adjacent to 2 but is not adjacent to 3, so it must be gone
    assert!(engine.latest_released("ch0"));
    assert!(!engine.latest_released("ch3"));
}

#[tokio::test(start_paused = true)]
async fn standby_failure_is_silently_absorbed() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;

    engine.fail("ch3", "connection refused");
    settle().await;

    let snapshot = state.get_state().await;
    // Never surfaced to the user
    assert_eq!(snapshot.error, None);
    assert!(snapshot.is_playing);
    assert!(!snapshot.prebuffered_channels.contains(&"ch3".to_string()));

    // Evicted from the pool, not retried
    assert!(engine.latest_released("ch3"));
    assert_eq!(engine.spawns_for("ch3"), 1);
    let stats = zapper.stats().await.unwrap();
    assert!(!stats.ready_channels.contains(&"ch3".to_string()));
}

#[tokio::test(start_paused = true)]
async fn active_failure_surfaces_error_and_stops() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;
    engine.mark_ready("ch1");
    settle().await;

    engine.fail("ch2", "stream died");
    settle().await;

    let snapshot = state.get_state().await;
    assert_eq!(snapshot.playback_status, PlaybackStatus::Error);
    assert!(!snapshot.is_playing);
    assert!(snapshot.error.as_deref().unwrap_or("").contains("stream died"));

    // Standby buffers are unaffected by an active failure
    assert!(!engine.latest_released("ch1"));
    assert!(snapshot.prebuffered_channels.contains(&"ch1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn blank_url_is_a_precondition_failure() {
    let (zapper, engine, state) = start(3);

    let dead = Channel {
        id: "dead".into(),
        name: "Dead Channel".into(),
        url: "  ".into(),
        ..Default::default()
    };
    let outcome = zapper.play_channel(dead).await.unwrap();
    assert_eq!(outcome, SwitchOutcome::NoStream);

    let snapshot = state.get_state().await;
    assert!(snapshot
        .error
        .as_deref()
        .unwrap_or("")
        .contains("no stream available"));
    // No handle was created
    assert_eq!(engine.spawn_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_index_is_rejected() {
    let (zapper, engine, _state) = start(3);
    let outcome = zapper.play_index(99).await.unwrap();
    assert_eq!(outcome, SwitchOutcome::NoSuchChannel);
    assert_eq!(engine.spawn_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rapid_zapping_prebuffers_only_the_final_target() {
    let (zapper, engine, _state) = start(8);

    zapper.play_index(0).await.unwrap();

    // Surf down three times, well inside the 500ms debounce each time
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        zapper.channel_down().await.unwrap();
    }
    // 0 → 7 → 6 → 5
    settle_prebuffer().await;

    // Standby buffers exist only for the final target's adjacency (ch6 and
    // ch7 are covered by the demoted mains that are still pooled, so the
    // scheduler only had to create ch4 and ch3).
    let standby = engine.standby_channels();
    let expected: HashSet<String> = ["ch4", "ch3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(standby, expected);

    // Nothing was ever buffered for channels merely passed through
    assert_eq!(engine.spawns_for("ch1"), 0);
    assert_eq!(engine.spawns_for("ch2"), 0);

    // The transient main for ch0 fell outside adjacency(5) and was evicted
    assert!(engine.latest_released("ch0"));

    let stats = zapper.stats().await.unwrap();
    assert_eq!(stats.active_channel.as_deref(), Some("ch5"));
    assert!(stats.pool_size <= 5);
}

#[tokio::test(start_paused = true)]
async fn release_is_idempotent_and_resets_state() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;
    engine.mark_ready("ch3");
    settle().await;

    for _ in 0..2 {
        zapper.release().await.unwrap();
        settle().await;

        let stats = zapper.stats().await.unwrap();
        assert_eq!(stats.pool_size, 0);
        assert_eq!(stats.ready_count, 0);
        assert_eq!(stats.active_channel, None);

        let snapshot = state.get_state().await;
        assert!(!snapshot.is_playing);
        assert!(!snapshot.is_buffering);
        assert_eq!(snapshot.playback_status, PlaybackStatus::Idle);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.current_channel, None);
        assert!(!snapshot.instant_switch_ready);
        assert!(snapshot.prebuffered_channels.is_empty());
    }

    assert!(engine.latest_released("ch2"));
    assert!(engine.latest_released("ch3"));

    // The core is still usable after a release
    let outcome = zapper.play_index(1).await.unwrap();
    assert_eq!(outcome, SwitchOutcome::Cold);
}

#[tokio::test(start_paused = true)]
async fn channel_up_down_wrap_around() {
    let (zapper, _engine, state) = start(3);

    zapper.play_index(2).await.unwrap();
    zapper.channel_up().await.unwrap();
    assert_eq!(state.get_state().await.current_channel, Some(0));

    zapper.channel_down().await.unwrap();
    assert_eq!(state.get_state().await.current_channel, Some(2));
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_standbys_for_instant_back_switch() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;
    engine.mark_ready("ch3");
    settle().await;

    zapper.stop().await.unwrap();
    settle().await;

    let snapshot = state.get_state().await;
    assert_eq!(snapshot.playback_status, PlaybackStatus::Idle);
    assert!(!snapshot.is_playing);
    assert!(engine.latest_released("ch2"));

    // The standby pool survived; zapping to ch3 is still instant
    assert!(!engine.latest_released("ch3"));
    let outcome = zapper.play_index(3).await.unwrap();
    assert_eq!(outcome, SwitchOutcome::Instant);
}

#[tokio::test(start_paused = true)]
async fn standby_handles_are_quality_capped() {
    let (zapper, engine, _state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;

    let spawns = engine.spawns.lock().unwrap();
    assert!(spawns.iter().any(|r| !r.main));
    for record in spawns.iter() {
        if record.main {
            assert!(!record.limit_quality, "main handles run at full quality");
        } else {
            assert!(record.limit_quality, "standby handles are quality-capped");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn mute_and_volume_apply_to_the_active_handle() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle().await;

    zapper.toggle_mute().await.unwrap();
    zapper.set_volume(0.8).await.unwrap();
    settle().await;

    let snapshot = state.get_state().await;
    assert!(snapshot.muted);
    assert_eq!(snapshot.volume, 0.8);

    let cmds = engine.latest_commands("ch2");
    assert!(cmds.contains(&PlayerCmd::Muted(true)));
    assert!(cmds.contains(&PlayerCmd::Volume(0.8)));
}

#[tokio::test(start_paused = true)]
async fn replacing_the_channel_list_reconciles_the_pool() {
    let (zapper, engine, state) = start(6);

    zapper.play_index(2).await.unwrap();
    engine.mark_ready("ch2");
    settle_prebuffer().await;

    // New list keeps ch2 (new position 0) and drops everything else
    let mut new_list = channel_list(8);
    new_list.retain(|c| c.id == "ch2");
    new_list.extend(channel_list(8).into_iter().filter(|c| c.id == "ch6" || c.id == "ch7"));
    zapper.set_channels(new_list).await.unwrap();
    settle_prebuffer().await;

    let snapshot = state.get_state().await;
    assert_eq!(snapshot.current_channel, Some(0));
    assert_eq!(snapshot.channels.len(), 3);

    // Old neighbours are gone; the new ones are buffering
    assert!(engine.latest_released("ch1"));
    assert!(engine.latest_released("ch3"));
    assert_eq!(engine.spawns_for("ch6"), 1);
    assert_eq!(engine.spawns_for("ch7"), 1);
}
