//! Conversation memory: what each bot remembers of each sender.
//!
//! History is kept per (sender, responder) pair, newest first, bounded both
//! by count and by age. The set of pairs is itself bounded: when `max_pairs`
//! is reached the least-recently-used pair is forgotten.
//!
//! ```text
//! (sender, responder) ──▶ [newest, ..., oldest]   ≤ max_interactions_per_pair
//!                                                  none older than ttl
//! ```
//!
//! Expired entries are dropped lazily on every read and write of a pair, and
//! eagerly across all pairs by [`ConversationMemory::sweep`].

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::MemoryConfig;
use crate::types::{Participant, ParticipantId};

/// One remembered exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    /// When the exchange was recorded.
    pub timestamp: Instant,
    /// Who spoke first.
    pub sender: ParticipantId,
    /// Who replied.
    pub responder: ParticipantId,
    /// Sender's display name at the time.
    pub sender_name: String,
    /// Responder's display name at the time.
    pub responder_name: String,
    /// The original message.
    pub message: String,
    /// The generated reply.
    pub response: String,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| now.saturating_duration_since(self.timestamp) > ttl)
    }

    fn render(&self) -> String {
        format!(
            "{}: {}\n{}: {}\n",
            self.sender_name, self.message, self.responder_name, self.response
        )
    }
}

type PairKey = (ParticipantId, ParticipantId);

/// Result of a sweep over all pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed for exceeding the TTL.
    pub expired_entries: usize,
    /// Pairs removed because nothing was left.
    pub removed_pairs: usize,
}

/// Bounded, TTL-expiring conversation store.
pub struct ConversationMemory {
    config: MemoryConfig,
    pairs: Mutex<LruCache<PairKey, VecDeque<MemoryEntry>>>,
}

impl ConversationMemory {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        let pairs = match NonZeroUsize::new(config.max_pairs) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            config,
            pairs: Mutex::new(pairs),
        }
    }

    /// Whether recording is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record an exchange at the current time.
    pub fn append(
        &self,
        sender: &Participant,
        responder: &Participant,
        message: &str,
        response: &str,
    ) {
        self.append_at(sender, responder, message, response, Instant::now());
    }

    /// Record an exchange at `now`.
    ///
    /// The entry goes to the front of the pair's history; expired entries are
    /// then pruned and the history truncated to `max_interactions_per_pair`.
    pub fn append_at(
        &self,
        sender: &Participant,
        responder: &Participant,
        message: &str,
        response: &str,
        now: Instant,
    ) {
        if !self.config.enabled || self.config.max_interactions_per_pair == 0 {
            return;
        }

        let entry = MemoryEntry {
            timestamp: now,
            sender: sender.id,
            responder: responder.id,
            sender_name: sender.name.clone(),
            responder_name: responder.name.clone(),
            message: message.to_string(),
            response: response.to_string(),
        };
        let key = (sender.id, responder.id);
        let ttl = self.config.ttl();

        let mut pairs = self.pairs.lock();
        if let Some(history) = pairs.get_mut(&key) {
            history.push_front(entry);
            history.retain(|e| !e.is_expired(now, ttl));
            history.truncate(self.config.max_interactions_per_pair);
            return;
        }

        let mut history = VecDeque::with_capacity(self.config.max_interactions_per_pair);
        history.push_front(entry);
        if let Some((evicted, _)) = pairs.push(key, history) {
            if evicted != key {
                debug!(
                    sender = %evicted.0,
                    responder = %evicted.1,
                    "Conversation pair evicted (max_pairs reached)"
                );
            }
        }
    }

    /// Render the pair's recent history for a prompt.
    #[must_use]
    pub fn context(&self, sender: ParticipantId, responder: ParticipantId) -> String {
        self.context_at(sender, responder, Instant::now())
    }

    /// Render the pair's history as seen at `now`.
    ///
    /// Entries come newest first as `"sender: message"` / `"responder:
    /// response"` line pairs. Rendering stops at the first entry that would
    /// push the text past `max_context_length`; entries are never cut in half.
    #[must_use]
    pub fn context_at(&self, sender: ParticipantId, responder: ParticipantId, now: Instant) -> String {
        if !self.config.enabled {
            return String::new();
        }

        let key = (sender, responder);
        let ttl = self.config.ttl();
        let mut pairs = self.pairs.lock();

        let Some(history) = pairs.get_mut(&key) else {
            return String::new();
        };
        history.retain(|e| !e.is_expired(now, ttl));
        if history.is_empty() {
            pairs.pop(&key);
            return String::new();
        }

        let mut out = String::new();
        let mut length = 0;
        for entry in history.iter() {
            let rendered = entry.render();
            let rendered_len = rendered.chars().count();
            if length + rendered_len > self.config.max_context_length {
                break;
            }
            length += rendered_len;
            out.push_str(&rendered);
        }
        out
    }

    /// Snapshot of a pair's stored history, newest first.
    #[must_use]
    pub fn history(&self, sender: ParticipantId, responder: ParticipantId) -> Vec<MemoryEntry> {
        self.pairs
            .lock()
            .peek(&(sender, responder))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries stored for a pair (expired ones included until pruned).
    #[must_use]
    pub fn history_len(&self, sender: ParticipantId, responder: ParticipantId) -> usize {
        self.pairs
            .lock()
            .peek(&(sender, responder))
            .map_or(0, VecDeque::len)
    }

    /// Number of tracked pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.pairs.lock().len()
    }

    /// Remove expired entries from every pair and delete emptied pairs.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let ttl = self.config.ttl();
        let mut report = SweepReport::default();
        let mut pairs = self.pairs.lock();

        let mut emptied = Vec::new();
        for (key, history) in pairs.iter_mut() {
            let before = history.len();
            history.retain(|e| !e.is_expired(now, ttl));
            report.expired_entries += before - history.len();
            if history.is_empty() {
                emptied.push(*key);
            }
        }
        for key in &emptied {
            pairs.pop(key);
        }
        report.removed_pairs = emptied.len();

        if report.expired_entries > 0 {
            debug!(
                expired = report.expired_entries,
                removed_pairs = report.removed_pairs,
                remaining_pairs = pairs.len(),
                "Conversation memory swept"
            );
        }
        report
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.pairs.lock().clear();
    }
}
