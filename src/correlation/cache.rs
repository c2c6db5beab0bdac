//! Ephemeral join point between coordinate samples and later inferences.
//!
//! Keyed by (session id, round id), last write wins, reads do not consume the
//! entry. One mutex guards the whole map. An optional [`CachePolicy`] bounds the
//! map's lifetime and size; without one the cache keeps entries until removed.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use super::sample::CoordinateSample;

type CacheKey = (String, String);

/// Queue records left behind by overwrites are compacted once they outnumber
/// live entries by this much.
const COMPACT_SLACK: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
    pub max_entries: Option<usize>,
}

impl CachePolicy {
    pub const UNBOUNDED: Self = Self {
        ttl: None,
        max_entries: None,
    };
}

struct CacheEntry {
    sample: CoordinateSample,
    stored_at: Instant,
    seq: u64,
}

/// Entries plus their write order. `order` may hold stale records for keys
/// that were overwritten or removed; a record is live only while its `seq`
/// matches the entry's.
#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<(CacheKey, u64)>,
    next_seq: u64,
}

impl CacheState {
    fn is_live(&self, key: &CacheKey, seq: u64) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.seq == seq)
    }

    /// Pops expired entries off the front of the write order.
    fn purge_front(&mut self, ttl: Option<Duration>, now: Instant) -> usize {
        let Some(ttl) = ttl else {
            return 0;
        };
        let mut removed = 0;
        while let Some((key, seq)) = self.order.front() {
            if !self.is_live(key, *seq) {
                self.order.pop_front();
                continue;
            }
            let expired = self
                .entries
                .get(key)
                .is_some_and(|entry| now.saturating_duration_since(entry.stored_at) >= ttl);
            if !expired {
                break;
            }
            if let Some((key, _)) = self.order.pop_front() {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    fn evict_oldest(&mut self) {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.is_live(&key, seq) {
                self.entries.remove(&key);
                return;
            }
        }
    }

    fn insert(&mut self, key: CacheKey, sample: CoordinateSample, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((key.clone(), seq));
        self.entries.insert(
            key,
            CacheEntry {
                sample,
                stored_at: now,
                seq,
            },
        );

        if self.order.len() > self.entries.len() * 2 + COMPACT_SLACK {
            let entries = &self.entries;
            self.order
                .retain(|(key, seq)| entries.get(key).is_some_and(|entry| entry.seq == *seq));
        }
    }
}

pub struct CorrelationCache {
    policy: CachePolicy,
    state: Mutex<CacheState>,
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self::with_policy(CachePolicy::UNBOUNDED)
    }

    pub fn with_policy(policy: CachePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// No-op when either key component is missing or empty.
    pub fn put(&self, session_id: Option<&str>, round_id: Option<&str>, sample: CoordinateSample) {
        let Some(key) = cache_key(session_id, round_id) else {
            return;
        };

        let now = Instant::now();
        let mut state = self.lock();
        state.purge_front(self.policy.ttl, now);

        if let Some(max) = self.policy.max_entries {
            if max == 0 {
                return;
            }
            if !state.entries.contains_key(&key) && state.entries.len() >= max {
                state.evict_oldest();
            }
        }

        state.insert(key, sample, now);
    }

    pub fn get(&self, session_id: Option<&str>, round_id: Option<&str>) -> Option<CoordinateSample> {
        let key = cache_key(session_id, round_id)?;
        let mut state = self.lock();

        let expired = state
            .entries
            .get(&key)
            .map(|entry| self.is_expired(entry, Instant::now()))?;
        if expired {
            state.entries.remove(&key);
            return None;
        }
        state.entries.get(&key).map(|entry| entry.sample.clone())
    }

    pub fn remove(&self, session_id: Option<&str>, round_id: Option<&str>) -> Option<CoordinateSample> {
        let key = cache_key(session_id, round_id)?;
        let entry = self.lock().entries.remove(&key)?;
        if self.is_expired(&entry, Instant::now()) {
            None
        } else {
            Some(entry.sample)
        }
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.lock().purge_front(self.policy.ttl, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        match self.policy.ttl {
            Some(ttl) => now.saturating_duration_since(entry.stored_at) >= ttl,
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn cache_key(session_id: Option<&str>, round_id: Option<&str>) -> Option<CacheKey> {
    match (session_id, round_id) {
        (Some(session), Some(round)) if !session.is_empty() && !round.is_empty() => {
            Some((session.to_string(), round.to_string()))
        }
        _ => None,
    }
}
