/// Cloneable command handle to a running [`ZapperCore`](crate::ZapperCore).
///
/// Every method funnels into the core's single event loop; methods that
/// produce a result await a oneshot reply.  Playback failures never come
/// back through these calls; they land in the observable state.  The only
/// error a `Zapper` method returns is "core task gone".
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::engine::SurfaceId;
use crate::BroadcastMessage;
use zaptv_proto::protocol::{Channel, PoolStats};
use zaptv_proto::state::StateManager;

/// How a `play_*` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Served from an already-buffered standby handle, with no start-up delay.
    Instant,
    /// A fresh handle had to be created (or an unready one promoted);
    /// playback starts once it buffers.
    Cold,
    /// The channel has no stream URL; nothing was created.
    NoStream,
    /// Index out of range / unknown channel.
    NoSuchChannel,
}

impl SwitchOutcome {
    pub fn switched(&self) -> bool {
        matches!(self, SwitchOutcome::Instant | SwitchOutcome::Cold)
    }
}

#[derive(Debug)]
pub(crate) enum ZapCommand {
    SetChannels(Vec<Channel>),
    Play {
        channel: Channel,
        reply: oneshot::Sender<SwitchOutcome>,
    },
    PlayIndex {
        index: usize,
        reply: oneshot::Sender<SwitchOutcome>,
    },
    Up {
        reply: oneshot::Sender<SwitchOutcome>,
    },
    Down {
        reply: oneshot::Sender<SwitchOutcome>,
    },
    InstantAvailable {
        channel_id: String,
        reply: oneshot::Sender<bool>,
    },
    SetSurface(Option<SurfaceId>),
    SetMuted(bool),
    ToggleMute,
    SetVolume(f32),
    Pause,
    Resume,
    Stop,
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Release,
    Shutdown,
}

#[derive(Clone)]
pub struct Zapper {
    pub(crate) tx: mpsc::Sender<ZapCommand>,
    pub(crate) state: Arc<StateManager>,
    pub(crate) broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Zapper {
    async fn send(&self, cmd: ZapCommand) -> anyhow::Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("player core is gone"))
    }

    async fn request<T>(
        &self,
        cmd: ZapCommand,
        reply: oneshot::Receiver<T>,
    ) -> anyhow::Result<T> {
        self.send(cmd).await?;
        reply
            .await
            .map_err(|_| anyhow::anyhow!("player core dropped the reply"))
    }

    /// Replace the channel list wholesale.  Triggers an adjacency recompute.
    pub async fn set_channels(&self, channels: Vec<Channel>) -> anyhow::Result<()> {
        self.send(ZapCommand::SetChannels(channels)).await
    }

    /// Switch to `channel`, instantly when a ready standby buffer exists.
    pub async fn play_channel(&self, channel: Channel) -> anyhow::Result<SwitchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.request(ZapCommand::Play { channel, reply: tx }, rx).await
    }

    /// Bounds-checked switch by position in the channel list.
    pub async fn play_index(&self, index: usize) -> anyhow::Result<SwitchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.request(ZapCommand::PlayIndex { index, reply: tx }, rx)
            .await
    }

    pub async fn channel_up(&self) -> anyhow::Result<SwitchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.request(ZapCommand::Up { reply: tx }, rx).await
    }

    pub async fn channel_down(&self) -> anyhow::Result<SwitchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.request(ZapCommand::Down { reply: tx }, rx).await
    }

    /// Pure query: would `play_channel` on this id be instant right now?
    pub async fn instant_switch_available(&self, channel_id: &str) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(
            ZapCommand::InstantAvailable {
                channel_id: channel_id.to_string(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub async fn set_surface(&self, surface: Option<SurfaceId>) -> anyhow::Result<()> {
        self.send(ZapCommand::SetSurface(surface)).await
    }

    pub async fn set_muted(&self, muted: bool) -> anyhow::Result<()> {
        self.send(ZapCommand::SetMuted(muted)).await
    }

    pub async fn toggle_mute(&self) -> anyhow::Result<()> {
        self.send(ZapCommand::ToggleMute).await
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        self.send(ZapCommand::SetVolume(volume)).await
    }

    pub async fn pause(&self) -> anyhow::Result<()> {
        self.send(ZapCommand::Pause).await
    }

    pub async fn resume(&self) -> anyhow::Result<()> {
        self.send(ZapCommand::Resume).await
    }

    /// Stop the active channel.  Standby buffers survive, so switching back
    /// stays instant.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(ZapCommand::Stop).await
    }

    /// Diagnostic snapshot of the pre-buffer pool.
    pub async fn stats(&self) -> anyhow::Result<PoolStats> {
        let (tx, rx) = oneshot::channel();
        self.request(ZapCommand::Stats { reply: tx }, rx).await
    }

    /// Tear down every handle (active included), cancel in-flight buffering
    /// work and reset the observable state.  Idempotent.
    pub async fn release(&self) -> anyhow::Result<()> {
        self.send(ZapCommand::Release).await
    }

    /// Release and terminate the core loop.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ZapCommand::Shutdown).await;
    }

    pub fn state(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }
}
