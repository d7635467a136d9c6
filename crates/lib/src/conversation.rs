//! Conversation instances: one running dialogue per (user, channel).
//!
//! A conversation owns its [`StepState`] behind a turn lock. Turns are serialized by that lock, and
//! the only way to advance a conversation is through a [`Turn`] obtained from [`Conversation::acquire`],
//! which refuses to hand one out once the conversation has finished.

use crate::message::Identity;
use crate::options::Options;
use crate::template::{Outcome, StepState, Template, TurnInput};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Unique conversation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationId(uuid::Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conv-{}", self.0)
    }
}

/// Registry key: who is talking and where. Compared by value.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ConversationKey {
    pub user_id: String,
    pub channel_id: String,
}

impl ConversationKey {
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl From<Identity> for ConversationKey {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id,
            channel_id: identity.channel_id,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.channel_id)
    }
}

/// Lifecycle of a conversation as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Registered, no turn taken yet.
    Created,
    /// A turn is in progress.
    Running,
    /// Between messages, holding step state.
    Suspended,
    /// Done; never advanced again.
    Finished,
}

/// One instance of a template bound to a (user, channel) key.
pub struct Conversation {
    id: ConversationId,
    key: ConversationKey,
    template: Arc<Template>,
    options: Arc<Options>,
    created_at: DateTime<Utc>,
    last_active_ms: AtomicI64,
    turns: AtomicU32,
    /// Set only while the turn lock is held.
    finished: AtomicBool,
    running: AtomicBool,
    step: Mutex<StepState>,
}

impl Conversation {
    pub fn new(template: Arc<Template>, key: ConversationKey, options: Arc<Options>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            key,
            template,
            options,
            created_at: now,
            last_active_ms: AtomicI64::new(now.timestamp_millis()),
            turns: AtomicU32::new(0),
            finished: AtomicBool::new(false),
            running: AtomicBool::new(false),
            step: Mutex::new(StepState::default()),
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn user_id(&self) -> &str {
        &self.key.user_id
    }

    pub fn channel_id(&self) -> &str {
        &self.key.channel_id
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last completed turn (creation time before the first).
    pub fn last_active(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.last_active_ms.load(Ordering::SeqCst))
            .unwrap_or(self.created_at)
    }

    pub(crate) fn last_active_ms(&self) -> i64 {
        self.last_active_ms.load(Ordering::SeqCst)
    }

    /// Number of turns taken so far.
    pub fn turns(&self) -> u32 {
        self.turns.load(Ordering::SeqCst)
    }

    /// Current lifecycle state. `Running` only while the template body is executing; holding the
    /// lock for a snapshot or a retire attempt does not count.
    pub fn state(&self) -> ConversationState {
        if self.running.load(Ordering::SeqCst) {
            ConversationState::Running
        } else if self.is_finished() {
            ConversationState::Finished
        } else if self.turns() == 0 {
            ConversationState::Created
        } else {
            ConversationState::Suspended
        }
    }

    /// True once the conversation has finished, failed or been retired. It never runs again.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Copy of the step state, waiting for any in-progress turn.
    pub async fn snapshot(&self) -> StepState {
        self.step.lock().await.clone()
    }

    /// Wait for exclusive use of this conversation. `None` once it has finished.
    pub(crate) async fn acquire(&self) -> Option<Turn<'_>> {
        let step = self.step.lock().await;
        if self.is_finished() {
            return None;
        }
        Some(Turn {
            conversation: self,
            step,
        })
    }

    /// Mark finished unless a turn is in progress. Returns whether it was retired.
    pub(crate) fn try_retire(&self) -> bool {
        match self.step.try_lock() {
            Ok(_step) => {
                self.finished.store(true, Ordering::SeqCst);
                true
            }
            Err(_) => false,
        }
    }

    fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("template", &self.template.name())
            .field("turns", &self.turns())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on a live conversation, good for exactly one advance.
pub(crate) struct Turn<'a> {
    conversation: &'a Conversation,
    step: MutexGuard<'a, StepState>,
}

impl<'a> Turn<'a> {
    /// Run the template body once with `text`. Errors and panics finish the conversation.
    pub(crate) async fn advance(mut self, text: &str) -> Advanced<'a> {
        let conversation = self.conversation;
        let turn = conversation.turns.fetch_add(1, Ordering::SeqCst) + 1;
        let input = TurnInput {
            user_id: conversation.user_id(),
            channel_id: conversation.channel_id(),
            text,
            options: &conversation.options,
            turn,
        };
        let running = Running::enter(&conversation.running);
        let body = conversation.template.body().advance(&mut *self.step, &input);
        let result = match AssertUnwindSafe(body).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!(
                "dialogue panicked: {}",
                panic_message(&*payload)
            )),
        };
        conversation.touch();
        if !matches!(result, Ok(Outcome::Suspended)) {
            conversation.finished.store(true, Ordering::SeqCst);
        }
        drop(running);
        Advanced {
            _step: self.step,
            result,
        }
    }
}

/// Clears the running flag when the body returns or the turn is dropped mid-body.
struct Running<'a>(&'a AtomicBool);

impl<'a> Running<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Result of a turn. Keeps the conversation locked until dropped, so the dispatcher can retire it
/// before anyone waiting on the lock looks at it.
pub(crate) struct Advanced<'a> {
    _step: MutexGuard<'a, StepState>,
    result: anyhow::Result<Outcome>,
}

impl Advanced<'_> {
    /// True when the conversation must leave the registry.
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self.result, Ok(Outcome::Suspended))
    }

    pub(crate) fn into_result(self) -> anyhow::Result<Outcome> {
        self.result
    }
}
