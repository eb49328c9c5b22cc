use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use zaptv_core::{BroadcastMessage, Zapper};
use zaptv_proto::protocol::{Broadcast, Command, Message, PROTOCOL_VERSION};
use zaptv_proto::state::StateManager;

pub struct ClientHandle {
    pub id: usize,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    zapper: Zapper,
    state_manager: Arc<StateManager>,
    clients: Arc<RwLock<Vec<ClientHandle>>>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;

                    {
                        let mut guard = clients.write().await;
                        guard.push(ClientHandle { id });
                    }
                    info!("Client {} connected from {}", id, peer);

                    let zapper = zapper.clone();
                    let sm = state_manager.clone();
                    let bcast_rx = broadcast_tx.subscribe();
                    let clients_ref = clients.clone();

                    tokio::spawn(async move {
                        handle_client(stream, zapper, sm, id, bcast_rx).await;

                        let mut guard = clients_ref.write().await;
                        guard.retain(|c| c.id != id);
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    zapper: Zapper,
    state_manager: Arc<StateManager>,
    client_id: usize,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with the current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    if let Err(e) = apply_command(&zapper, &state_manager, &mut write_half, cmd).await {
                                        warn!("Client {} command failed: {}", client_id, e);
                                        return;
                                    }

                                    if let Ok(encoded) = encode_state(&state_manager).await {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(BroadcastMessage::StateUpdated) => {
                        if let Ok(encoded) = encode_state(&state_manager).await {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(BroadcastMessage::Switched { channel_id, instant }) => {
                        let broadcast = Broadcast::Switched { channel_id, instant };
                        if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        let broadcast = Broadcast::Log { message };
                        if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        if let Ok(encoded) = encode_state(&state_manager).await {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

/// Map one wire command onto the player core.  Commands with a per-client
/// answer (stats) are written straight back to the requesting client; state
/// changes reach everyone through the broadcast fan-out.
async fn apply_command(
    zapper: &Zapper,
    state_manager: &Arc<StateManager>,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    cmd: Command,
) -> anyhow::Result<()> {
    match cmd {
        Command::Play { index } => {
            zapper.play_index(index).await?;
        }
        Command::Up => {
            zapper.channel_up().await?;
        }
        Command::Down => {
            zapper.channel_down().await?;
        }
        Command::Random => {
            use rand::Rng;
            let len = state_manager.get_state().await.channels.len();
            if len > 0 {
                let index = rand::thread_rng().gen_range(0..len);
                zapper.play_index(index).await?;
            }
        }
        Command::Stop => zapper.stop().await?,
        Command::Pause => zapper.pause().await?,
        Command::Resume => zapper.resume().await?,
        Command::SetMuted { muted } => zapper.set_muted(muted).await?,
        Command::ToggleMute => zapper.toggle_mute().await?,
        Command::Volume { value } => zapper.set_volume(value).await?,
        Command::SetSurface { id } => {
            zapper
                .set_surface(id.map(zaptv_core::engine::SurfaceId))
                .await?;
        }
        Command::GetState => {
            // State snapshot follows every command anyway
        }
        Command::GetStats => {
            let stats = zapper.stats().await?;
            let encoded = Message::Broadcast(Broadcast::Stats { data: stats }).encode()?;
            write_half.write_all(&encoded).await?;
        }
    }
    Ok(())
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}
