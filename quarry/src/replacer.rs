//! LRU-K replacement policy for the buffer pool.
//!
//! A frame's backward K-distance is the gap between now and its K-th most
//! recent access. Frames with fewer than K recorded accesses have infinite
//! K-distance and are evicted first, oldest first access winning ties.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::{AccessType, FrameId};

#[derive(Debug)]
struct LruKNode {
    /// The last K access timestamps, oldest first.
    history: VecDeque<u64>,
    is_evictable: bool,
}

#[derive(Debug, Default)]
struct ReplacerState {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    curr_size: usize,
}

pub struct LruKReplacer {
    state: Mutex<ReplacerState>,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K needs k >= 1");
        Self {
            state: Mutex::new(ReplacerState::default()),
            replacer_size: num_frames,
            k,
        }
    }

    /// Picks a victim among the evictable frames and forgets its history.
    /// Frames with infinite K-distance (fewer than K accesses) win, oldest
    /// first access first; otherwise the smallest K-th most recent access.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock().unwrap();
        let mut victim: Option<(FrameId, bool, u64)> = None;

        for (&frame_id, node) in state.node_store.iter() {
            if !node.is_evictable {
                continue;
            }
            let infinite = node.history.len() < self.k;
            // With at most K timestamps retained, the front is the K-th most
            // recent access once the history is full.
            let key = node.history.front().copied().unwrap_or(0);
            let better = match victim {
                None => true,
                Some((_, best_infinite, best_key)) => {
                    if infinite != best_infinite {
                        infinite
                    } else {
                        key < best_key
                    }
                }
            };
            if better {
                victim = Some((frame_id, infinite, key));
            }
        }

        let (frame_id, _, _) = victim?;
        state.node_store.remove(&frame_id);
        state.curr_size -= 1;
        crate::quarry_debug_log!("[LruKReplacer::evict] Evicting frame {frame_id}");
        Some(frame_id)
    }

    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        assert!(
            frame_id < self.replacer_size,
            "frame id {frame_id} out of range for replacer of size {}",
            self.replacer_size
        );
        let mut state = self.state.lock().unwrap();
        state.current_timestamp += 1;
        let now = state.current_timestamp;
        let node = state.node_store.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::new(),
            is_evictable: false,
        });
        node.history.push_back(now);
        if node.history.len() > self.k {
            node.history.pop_front();
        }
    }

    pub fn set_evictable(&self, frame_id: FrameId, set_evictable: bool) {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let Some(node) = state.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable == set_evictable {
            return;
        }
        node.is_evictable = set_evictable;
        if set_evictable {
            state.curr_size += 1;
        } else {
            state.curr_size -= 1;
        }
    }

    /// Drops a frame's history entirely. Removing a pinned (non-evictable)
    /// frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock().unwrap();
        let Some(node) = state.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "remove of non-evictable frame {frame_id}"
        );
        state.node_store.remove(&frame_id);
        state.curr_size -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().curr_size
    }
}
