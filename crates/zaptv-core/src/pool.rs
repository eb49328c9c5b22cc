/// Keyed pool of live playback handles.
///
/// The pool owns every spawned player instance, active and standby alike,
/// and is mutated only from the core loop.  Nothing in here is clever on
/// purpose: eviction policy lives in the scheduler; the pool just guarantees
/// that removal always releases the underlying engine instance, so a handle
/// can never leak a decoder.
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::engine::{EnginePlayer, HandleId};
use zaptv_proto::protocol::PoolStats;

/// One pooled player instance bound to a single channel's stream.
pub struct PlaybackHandle {
    /// Identity of the engine instance behind this handle; used to discard
    /// engine events that outlive an evict/re-spawn cycle.
    pub id: HandleId,
    pub channel_id: String,
    pub url: String,
    /// Whether this instance was created to go on air (cold switch) rather
    /// than as a speculative standby buffer.
    pub created_as_main: bool,
    /// Flips to true at most once, when the engine reports enough buffered
    /// data; never back (a broken handle is evicted, not downgraded).
    pub ready: bool,
    pub player: Box<dyn EnginePlayer>,
}

impl PlaybackHandle {
    fn release(&mut self) {
        self.player.release();
    }
}

#[derive(Default)]
pub struct HandlePool {
    entries: HashMap<String, PlaybackHandle>,
}

impl HandlePool {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<&PlaybackHandle> {
        self.entries.get(channel_id)
    }

    pub fn get_mut(&mut self, channel_id: &str) -> Option<&mut PlaybackHandle> {
        self.entries.get_mut(channel_id)
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.entries.contains_key(channel_id)
    }

    /// Insert or replace.  A replaced handle is released first.
    pub fn put(&mut self, handle: PlaybackHandle) {
        if let Some(mut old) = self.entries.insert(handle.channel_id.clone(), handle) {
            debug!("pool: replacing handle for '{}'", old.channel_id);
            old.release();
        }
    }

    /// Remove and release.  No-op when the channel is not pooled.
    pub fn evict(&mut self, channel_id: &str) {
        if let Some(mut handle) = self.entries.remove(channel_id) {
            debug!(
                "pool: evicting '{}' (handle {}, ready={})",
                channel_id, handle.id, handle.ready
            );
            handle.release();
        }
    }

    /// Evict everything outside `keep`.  This is the sole bound on pool
    /// size; the scheduler calls it after every adjacency recompute, before
    /// creating anything new.  Returns how many entries were released.
    pub fn reconcile(&mut self, keep: &HashSet<String>) -> usize {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            self.evict(id);
        }
        stale.len()
    }

    /// Evict and release every handle.
    pub fn clear(&mut self) {
        for (_, mut handle) in self.entries.drain() {
            handle.release();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Channel ids with a ready buffer, in no particular order.
    pub fn ready_ids(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|h| h.ready)
            .map(|h| h.channel_id.clone())
            .collect()
    }

    pub fn stats(&self, active_channel: Option<&str>) -> PoolStats {
        let mut ready_channels = self.ready_ids();
        ready_channels.sort();
        PoolStats {
            pool_size: self.entries.len(),
            ready_count: ready_channels.len(),
            active_channel: active_channel.map(|s| s.to_string()),
            ready_channels,
        }
    }
}
