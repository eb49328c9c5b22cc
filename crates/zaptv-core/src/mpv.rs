/// mpv-backed [`MediaEngine`].
///
/// One mpv process per playback handle, each with its own IPC endpoint:
///
/// ```text
///   MpvEngine::spawn(request)
///         │
///         └── driver task   ← owns the child process
///                 ├── writer_task   ← serialises requests → socket
///                 ├── reader_task   ← JSON lines from socket
///                 │       ├── response (request_id) → matched oneshot
///                 │       └── unsolicited event     → driver
///                 └── translates mpv events into EngineEvents:
///                       file-loaded            → Ready
///                       end-file error/network → Failed
/// ```
///
/// Platform notes:
/// - Unix:    Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::engine::{
    EngineError, EngineEvent, EngineEventKind, EnginePlayer, MediaEngine, SpawnRequest, SurfaceId,
};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
struct MpvRawEvent {
    raw: Value,
}

impl MpvRawEvent {
    fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// Commands from the core loop into one driver task.  Fire-and-forget on the
/// caller's side; the driver applies them in order.
#[derive(Debug)]
enum PlayerCmd {
    SetPaused(bool),
    SetMuted(bool),
    SetVolume(f32),
    AttachSurface(Option<SurfaceId>),
    Release,
}

// ── engine ────────────────────────────────────────────────────────────────────

/// Spawns one mpv process per handle.  Instances start paused, muted and
/// with the video track disabled; the core enables audio/video on promotion.
pub struct MpvEngine;

impl MpvEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MpvEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for MpvEngine {
    fn spawn(&self, request: SpawnRequest) -> Box<dyn EnginePlayer> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerCmd>(32);
        tokio::spawn(driver_task(request, cmd_rx));
        Box::new(MpvPlayer {
            tx: cmd_tx,
            released: false,
        })
    }
}

/// Cheap handle to one driver task.
struct MpvPlayer {
    tx: mpsc::Sender<PlayerCmd>,
    released: bool,
}

impl MpvPlayer {
    fn send(&self, cmd: PlayerCmd) {
        if self.tx.try_send(cmd).is_err() {
            // Driver already gone (process died or released); nothing to do.
            debug!("mpv player: command dropped, driver gone");
        }
    }
}

impl EnginePlayer for MpvPlayer {
    fn set_paused(&self, paused: bool) {
        self.send(PlayerCmd::SetPaused(paused));
    }

    fn set_muted(&self, muted: bool) {
        self.send(PlayerCmd::SetMuted(muted));
    }

    fn set_volume(&self, volume: f32) {
        self.send(PlayerCmd::SetVolume(volume));
    }

    fn attach_surface(&self, surface: Option<SurfaceId>) {
        self.send(PlayerCmd::AttachSurface(surface));
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.send(PlayerCmd::Release);
        }
    }
}

// ── driver task ───────────────────────────────────────────────────────────────

/// Owns the mpv child for one handle: spawn, connect, translate events,
/// apply commands, kill on release.
async fn driver_task(request: SpawnRequest, mut cmd_rx: mpsc::Receiver<PlayerCmd>) {
    let SpawnRequest {
        handle,
        channel_id,
        url,
        main,
        limit_quality,
        events,
    } = request;

    let fail = |msg: String| EngineEvent {
        handle,
        channel_id: channel_id.clone(),
        kind: EngineEventKind::Failed(msg),
    };

    let Some(binary) = zaptv_proto::platform::find_mpv_binary() else {
        warn!("mpv: binary not found (handle {})", handle);
        let _ = events.send(fail(EngineError::BinaryNotFound.to_string())).await;
        return;
    };

    info!(
        "mpv: spawning instance for '{}' (handle {}, main={})",
        channel_id, handle, main
    );

    let mut cmd = tokio::process::Command::new(binary);
    cmd.arg("--no-terminal")
        .arg("--quiet")
        .arg("--idle=no")
        .arg("--force-window=no")
        .arg("--pause=yes")
        .arg("--mute=yes")
        .arg("--vid=no")
        .arg(zaptv_proto::platform::mpv_socket_arg(handle));
    if limit_quality {
        // Standby buffers should not cost a full-rate stream.
        cmd.arg("--hls-bitrate=min");
    }
    cmd.arg(&url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("mpv: spawn failed for '{}': {}", channel_id, e);
            let _ = events
                .send(fail(
                    EngineError::Other(format!("failed to start player: {}", e)).to_string(),
                ))
                .await;
            return;
        }
    };

    let (raw_tx, mut raw_rx) = mpsc::channel::<MpvRawEvent>(64);
    let ipc = match connect_ipc(handle, raw_tx).await {
        Ok(ipc) => ipc,
        Err(e) => {
            warn!("mpv: IPC connect failed for '{}': {}", channel_id, e);
            let _ = child.kill().await;
            let _ = events.send(fail(format!("player IPC unavailable: {}", e))).await;
            return;
        }
    };

    let mut sent_ready = false;
    let mut released = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(PlayerCmd::Release) => {
                        released = true;
                        break;
                    }
                    Some(PlayerCmd::SetPaused(paused)) => {
                        if let Err(e) = ipc.send(json!(["set_property", "pause", paused])).await {
                            debug!("mpv: set pause failed: {}", e);
                        }
                    }
                    Some(PlayerCmd::SetMuted(muted)) => {
                        if let Err(e) = ipc.send(json!(["set_property", "mute", muted])).await {
                            debug!("mpv: set mute failed: {}", e);
                        }
                    }
                    Some(PlayerCmd::SetVolume(vol)) => {
                        let pct = (vol * 100.0).clamp(0.0, 100.0);
                        if let Err(e) = ipc.send(json!(["set_property", "volume", pct])).await {
                            debug!("mpv: set volume failed: {}", e);
                        }
                    }
                    Some(PlayerCmd::AttachSurface(surface)) => {
                        // mpv cannot re-parent its window at runtime; surface
                        // attachment gates the video track instead.
                        let vid = if surface.is_some() { json!("auto") } else { json!("no") };
                        if let Err(e) = ipc.send(json!(["set_property", "vid", vid])).await {
                            debug!("mpv: set vid failed: {}", e);
                        }
                    }
                }
            }

            raw = raw_rx.recv() => {
                match raw {
                    None => {
                        // Reader task gone: socket closed or process died.
                        warn!("mpv: IPC closed for '{}' (handle {})", channel_id, handle);
                        let _ = events.send(fail("player connection closed".into())).await;
                        break;
                    }
                    Some(evt) => match evt.event_name() {
                        Some("file-loaded") => {
                            if !sent_ready {
                                sent_ready = true;
                                debug!("mpv: '{}' buffered (handle {})", channel_id, handle);
                                let _ = events.send(EngineEvent {
                                    handle,
                                    channel_id: channel_id.clone(),
                                    kind: EngineEventKind::Ready,
                                }).await;
                            }
                        }
                        Some("end-file") => {
                            let reason = evt.raw.get("reason")
                                .and_then(|v| v.as_str())
                                .unwrap_or("unknown");
                            info!("mpv: end-file reason={} ('{}')", reason, channel_id);
                            if matches!(reason, "error" | "network" | "quit") {
                                let _ = events.send(fail(format!("stream ended: {}", reason))).await;
                                break;
                            }
                        }
                        _ => {}
                    },
                }
            }
        }
    }

    if released {
        let _ = ipc.send(json!(["quit"])).await;
    }
    let _ = child.kill().await;
    debug!("mpv: driver for handle {} exiting", handle);
}

// ── IPC connection ────────────────────────────────────────────────────────────

/// Cloneable handle to the writer task.  `send()` fires a command and awaits
/// the matched response.
#[derive(Clone)]
struct MpvIpc {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvIpc {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }
}

#[cfg(unix)]
async fn connect_ipc(
    handle_id: u64,
    event_tx: mpsc::Sender<MpvRawEvent>,
) -> Result<MpvIpc, EngineError> {
    let socket_path = std::path::PathBuf::from(zaptv_proto::platform::mpv_socket_name(handle_id));

    // Wait for mpv to create the socket
    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if socket_path.exists() {
            break;
        }
    }
    if !socket_path.exists() {
        return Err(EngineError::IpcUnavailable);
    }

    let stream = UnixStream::connect(&socket_path)
        .await
        .map_err(|e| EngineError::Other(e.to_string()))?;
    debug!("mpv: connected to IPC socket {:?}", socket_path);

    let (read_half, write_half) = stream.into_split();
    Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
}

#[cfg(windows)]
async fn connect_ipc(
    handle_id: u64,
    event_tx: mpsc::Sender<MpvRawEvent>,
) -> Result<MpvIpc, EngineError> {
    let pipe_path = format!(r"\\.\pipe\{}", zaptv_proto::platform::mpv_socket_name(handle_id));

    for _ in 0..50 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                debug!("mpv: connected to named pipe {}", pipe_path);
                use tokio::io::split;
                let (read_half, write_half) = split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
            Err(_) => continue,
        }
    }
    Err(EngineError::IpcUnavailable)
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvRawEvent>,
) -> MpvIpc
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // pending map: req_id → reply channel.  Shared between writer (inserts)
    // and reader (resolves).
    let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvIpc { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    event_tx: mpsc::Sender<MpvRawEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    // Command response: route to the pending request
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    // Unsolicited event
                    if event_tx.send(MpvRawEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
