use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::video::types::Frame;

/// Cache key: source id and frame index
pub type FrameKey = (u64, usize);

/// Decoded frame cache shared by every source of a [`MediaCore`](super::MediaCore).
///
/// Entries are evicted oldest-first once the byte ceiling is exceeded.
pub struct FrameCache {
    capacity_bytes: usize,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    frames: HashMap<FrameKey, Arc<Frame>>,
    order: VecDeque<FrameKey>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl FrameCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn get(&self, key: FrameKey) -> Option<Arc<Frame>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let found = state.frames.get(&key).cloned();
        match found {
            Some(frame) => {
                state.hits += 1;
                Some(frame)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, key: FrameKey, frame: Arc<Frame>) {
        let size = frame.byte_size();
        if size > self.capacity_bytes {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.frames.contains_key(&key) {
            return;
        }

        state.frames.insert(key, frame);
        state.order.push_back(key);
        state.bytes += size;

        while state.bytes > self.capacity_bytes {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if let Some(evicted) = state.frames.remove(&oldest) {
                state.bytes -= evicted.byte_size();
                state.evictions += 1;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: state.frames.len(),
            bytes: state.bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::types::{BitDepth, ClipFormat};

    fn frame(value: u16) -> Arc<Frame> {
        let format = ClipFormat::gray(4, 4, BitDepth::EIGHT);
        Arc::new(Frame::new_filled(&format, &[value]))
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = FrameCache::new(1024);
        assert!(cache.get((1, 0)).is_none());

        cache.insert((1, 0), frame(7));
        assert_eq!(cache.get((1, 0)).unwrap().sample(0, 0, 0), 7);
        assert!(cache.get((2, 0)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.bytes, 32);
    }

    #[test]
    fn test_evicts_oldest_over_ceiling() {
        // each frame is 4 * 4 * 2 bytes
        let cache = FrameCache::new(64);
        cache.insert((1, 0), frame(0));
        cache.insert((1, 1), frame(1));
        cache.insert((1, 2), frame(2));

        assert!(cache.get((1, 0)).is_none());
        assert!(cache.get((1, 1)).is_some());
        assert!(cache.get((1, 2)).is_some());

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 1);
        assert!(stats.bytes <= 64);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = FrameCache::new(0);
        cache.insert((1, 0), frame(0));
        assert_eq!(cache.stats().entries, 0);
    }
}
