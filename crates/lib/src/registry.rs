//! Conversation registry: the active conversations, at most one per (user, channel).
//!
//! Constructed once (per process or per test) and shared as `Arc<Registry>`.

use crate::conversation::{Conversation, ConversationId, ConversationKey};
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no active conversation for {0}")]
    NotFound(ConversationKey),
    #[error("conversation {existing} is already active for {key}")]
    Conflict {
        key: ConversationKey,
        existing: ConversationId,
    },
    #[error("conversation {0} has finished and cannot be registered")]
    Finished(ConversationId),
}

/// Keyed store of active conversations.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<ConversationKey, Arc<Conversation>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_registered(&self, user_id: &str, channel_id: &str) -> bool {
        let key = ConversationKey::new(user_id, channel_id);
        self.inner.read().await.contains_key(&key)
    }

    pub async fn find(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Arc<Conversation>, RegistryError> {
        let key = ConversationKey::new(user_id, channel_id);
        let g = self.inner.read().await;
        g.get(&key).cloned().ok_or(RegistryError::NotFound(key))
    }

    /// Insert under the conversation's own key. Re-registering the same instance is a no-op;
    /// a different instance already holding the key is a conflict and is left in place. A finished
    /// conversation is refused.
    pub async fn register(&self, conversation: Arc<Conversation>) -> Result<(), RegistryError> {
        if conversation.is_finished() {
            return Err(RegistryError::Finished(conversation.id()));
        }
        let mut g = self.inner.write().await;
        match g.entry(conversation.key().clone()) {
            Entry::Occupied(e) if e.get().id() == conversation.id() => Ok(()),
            Entry::Occupied(e) => Err(RegistryError::Conflict {
                key: e.key().clone(),
                existing: e.get().id(),
            }),
            Entry::Vacant(e) => {
                e.insert(conversation);
                Ok(())
            }
        }
    }

    /// Remove the entry for the conversation's key if it is this instance. Idempotent.
    pub async fn unregister(&self, conversation: &Conversation) {
        let mut g = self.inner.write().await;
        if g.get(conversation.key())
            .is_some_and(|c| c.id() == conversation.id())
        {
            g.remove(conversation.key());
        }
    }

    /// Look up the conversation for `key`, or create one with `make` and register it, as one step.
    /// A finished conversation still holding the key is replaced. Returns the conversation and
    /// whether it was created.
    pub async fn resume_or_create<F>(
        &self,
        key: &ConversationKey,
        make: F,
    ) -> (Arc<Conversation>, bool)
    where
        F: FnOnce() -> Conversation,
    {
        if let Some(c) = self.inner.read().await.get(key) {
            if !c.is_finished() {
                return (c.clone(), false);
            }
        }
        let mut g = self.inner.write().await;
        match g.entry(key.clone()) {
            Entry::Occupied(e) if !e.get().is_finished() => (e.get().clone(), false),
            Entry::Occupied(mut e) => {
                log::debug!(
                    "registry: replacing finished conversation {} for {}",
                    e.get().id(),
                    key
                );
                let conversation = Arc::new(make());
                debug_assert_eq!(conversation.key(), key);
                e.insert(conversation.clone());
                (conversation, true)
            }
            Entry::Vacant(e) => {
                let conversation = Arc::new(make());
                debug_assert_eq!(conversation.key(), key);
                e.insert(conversation.clone());
                (conversation, true)
            }
        }
    }

    /// Drop every entry. For test isolation and shutdown; idle conversations are retired, ones in the
    /// middle of a turn finish that turn unregistered.
    pub async fn reset(&self) {
        let mut g = self.inner.write().await;
        for conversation in g.values() {
            conversation.try_retire();
        }
        g.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<ConversationKey> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Retire and remove conversations idle for longer than `ttl` as of `now`. Conversations in the
    /// middle of a turn are kept. Returns how many were evicted.
    pub async fn evict_idle(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let now_ms = now.timestamp_millis();
        let mut evicted = 0;
        let mut g = self.inner.write().await;
        g.retain(|key, conversation| {
            let idle_ms = now_ms.saturating_sub(conversation.last_active_ms());
            if idle_ms > ttl_ms && conversation.try_retire() {
                log::info!(
                    "registry: evicted idle conversation {} for {} ({}s idle)",
                    conversation.id(),
                    key,
                    idle_ms / 1000
                );
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }
}
