use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client (UI, remote, script) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { index: usize },
    Up,
    Down,
    Random,
    Stop,
    Pause,
    Resume,
    SetMuted { muted: bool },
    ToggleMute,
    Volume { value: f32 },
    /// Bind (or unbind) the render surface the active player draws into.
    SetSurface { id: Option<u64> },
    GetState,
    GetStats,
}

/// Messages sent from the daemon to clients (broadcasts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        state: PlayerState,
    },
    State {
        data: PlayerState,
    },
    /// A channel switch completed.  `instant` is true when the switch was
    /// served from an already-buffered standby handle.
    Switched {
        channel_id: String,
        instant: bool,
    },
    Stats {
        data: PoolStats,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Detailed playback status of the active channel slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing active / explicitly stopped
    Buffering, // switch issued, stream not yet ready
    Playing,   // active handle ready, audio/video flowing
    Paused,    // explicitly paused
    Error,     // active stream failed
}

/// Full observable state of the player.  `rev` is a monotonically increasing
/// counter incremented on every change; clients use it to detect missed
/// updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerState {
    /// Monotonic revision counter — incremented on every state change.
    #[serde(default)]
    pub rev: u64,
    pub channels: Vec<Channel>,
    /// Index of the current channel in `channels`, if any.
    pub current_channel: Option<usize>,
    pub volume: f32,
    pub muted: bool,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub playback_status: PlaybackStatus,
    /// Human-readable message for the last active-slot failure, if any.
    pub error: Option<String>,
    /// True when at least one adjacent channel is buffered and switchable
    /// with no start-up delay.
    #[serde(default)]
    pub instant_switch_ready: bool,
    /// Ids of the adjacent channels whose standby buffers are ready.
    #[serde(default)]
    pub prebuffered_channels: Vec<String>,
}

/// One entry in the navigable channel list.  The list itself is externally
/// supplied (M3U/TOML) and never mutated by the player; a channel's ordinal
/// position is its index in that list.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Channel {
    /// Stable identifier (IPTV `tvg-id`, falling back to the name).
    pub id: String,
    pub name: String,
    /// Stream URL.  Blank means the channel is listed but not playable.
    pub url: String,
    /// Group / category title (e.g. "News", "Sports").
    #[serde(default)]
    pub group: String,
    /// Logo URL, when the source list provides one.
    #[serde(default)]
    pub logo: String,
}

/// Diagnostic snapshot of the pre-buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolStats {
    pub pool_size: usize,
    pub ready_count: usize,
    pub active_channel: Option<String>,
    pub ready_channels: Vec<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_encode_decode() {
        let msg = Message::Command(Command::Play { index: 5 });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Play { index }) => assert_eq!(index, 5),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = PlayerState {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.rev, 42);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_partial_frame() {
        let msg = Message::Command(Command::Up);
        let encoded = msg.encode().unwrap();
        // A truncated frame must not decode
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..2]).is_err());
    }
}
