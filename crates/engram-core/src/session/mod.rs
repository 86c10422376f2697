//! Session manager
//!
//! Bounded LRU of rolling dialogue windows keyed by session id. Entries
//! expire after a TTL of inactivity: lazily on access, and in bulk through
//! the periodic sweep. When a session accumulates enough rounds (one user
//! turn plus one assistant turn), `append` hands back the buffered window
//! for the reflection engine and resets the counter.
//!
//! A coarse lock over the whole map is fine at the expected contention.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

use crate::config::SessionManagerConfig;
use crate::memory::{DialogueMessage, Role};

// ============================================================================
// SESSION BUFFER
// ============================================================================

/// Rolling per-session state
#[derive(Debug)]
struct SessionBuffer {
    messages: VecDeque<DialogueMessage>,
    rounds_since_reflection: u32,
    last_touched: i64,
}

impl SessionBuffer {
    fn new(now: i64) -> Self {
        Self {
            messages: VecDeque::new(),
            rounds_since_reflection: 0,
            last_touched: now,
        }
    }
}

// ============================================================================
// SESSION MANAGER
// ============================================================================

/// Bounded LRU/TTL cache of session buffers.
pub struct SessionManager {
    inner: Mutex<LruCache<String, SessionBuffer>>,
    config: SessionManagerConfig,
    trigger_rounds: u32,
}

impl SessionManager {
    /// Create a manager with the given bounds and reflection trigger.
    pub fn new(config: SessionManagerConfig, trigger_rounds: u32) -> Self {
        let capacity = NonZeroUsize::new(config.max_sessions.max(1))
            .expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            config,
            trigger_rounds: trigger_rounds.max(1),
        }
    }

    /// Append a message. Returns the buffered window when this message
    /// completes the round that crosses the reflection trigger; the round
    /// counter resets in that case.
    pub fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        now: i64,
    ) -> Option<Vec<DialogueMessage>> {
        let mut cache = self.lock();

        // Expired entries restart fresh rather than leaking stale rounds
        if let Some(buffer) = cache.peek(session_id) {
            if self.expired(buffer, now) {
                cache.pop(session_id);
            }
        }

        if !cache.contains(session_id) {
            // LruCache evicts the least-recently-used entry on overflow
            cache.push(session_id.to_string(), SessionBuffer::new(now));
        }
        let buffer = cache
            .get_mut(session_id)
            .expect("entry was just inserted");

        // A round closes when an assistant message follows a user message
        let closes_round = role == Role::Assistant
            && buffer
                .messages
                .back()
                .is_some_and(|m| m.role == Role::User);

        buffer
            .messages
            .push_back(DialogueMessage::new(role, content, now));
        while buffer.messages.len() > self.config.max_messages {
            buffer.messages.pop_front();
        }
        buffer.last_touched = now;

        if closes_round {
            buffer.rounds_since_reflection += 1;
            if buffer.rounds_since_reflection >= self.trigger_rounds {
                buffer.rounds_since_reflection = 0;
                let window: Vec<DialogueMessage> = buffer.messages.iter().cloned().collect();
                debug!(session = session_id, messages = window.len(), "reflection triggered");
                return Some(window);
            }
        }
        None
    }

    /// Snapshot a session's buffer, touching its recency. `None` when the
    /// session is unknown or expired.
    pub fn get(&self, session_id: &str, now: i64) -> Option<Vec<DialogueMessage>> {
        let mut cache = self.lock();
        if let Some(buffer) = cache.peek(session_id) {
            if self.expired(buffer, now) {
                cache.pop(session_id);
                return None;
            }
        }
        cache
            .get(session_id)
            .map(|buffer| buffer.messages.iter().cloned().collect())
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn sweep_expired(&self, now: i64) -> usize {
        let mut cache = self.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, buffer)| self.expired(buffer, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            cache.pop(id);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "expired sessions swept");
        }
        expired.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no sessions are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expired(&self, buffer: &SessionBuffer, now: i64) -> bool {
        now - buffer.last_touched > self.config.session_ttl as i64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, SessionBuffer>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// TESTS
// ============================================================================
