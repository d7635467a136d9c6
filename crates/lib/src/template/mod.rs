//! Dialogue templates: the reusable definition a conversation runs.
//!
//! A template pairs an optional name with a [`Dialogue`] body. The body is stateless; everything a
//! dialogue needs to remember between messages lives in the [`StepState`] it is handed each turn,
//! so a suspended dialogue is plain data rather than a captured closure.

mod catalog;
mod script;

pub use catalog::{CatalogError, TemplateCatalog};
pub use script::{Script, StepAction};

use crate::dispatch::{DispatchError, Dispatched, Dispatcher};
use crate::message::MessageAdapter;
use crate::options::Options;
use crate::registry::Registry;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// What a dialogue body reports after handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Waiting for the next message from the same user in the same channel.
    Suspended,
    /// Done; no further messages are routed to this conversation.
    Finished,
}

/// The continuation of a suspended dialogue: a stage tag plus accumulated data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
    #[serde(default)]
    data: Map<String, Value>,
}

impl StepState {
    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn set_stage(&mut self, stage: impl Into<String>) {
        self.stage = Some(stage.into());
    }

    pub fn clear_stage(&mut self) {
        self.stage = None;
    }

    /// Read a stored value; `None` when missing or not decodable as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> anyhow::Result<()> {
        self.data.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

/// Everything a dialogue body sees about the current message.
#[derive(Debug, Clone, Copy)]
pub struct TurnInput<'a> {
    pub user_id: &'a str,
    pub channel_id: &'a str,
    pub text: &'a str,
    /// Snapshot captured when the conversation was created.
    pub options: &'a Options,
    /// 1-based number of this turn within the conversation.
    pub turn: u32,
}

/// Dialogue logic: advance one step per inbound message.
#[async_trait]
pub trait Dialogue: Send + Sync {
    /// Handle one message. Rewrite `state` to remember where the dialogue left off and return
    /// [`Outcome::Suspended`], or return [`Outcome::Finished`] when done. Errors end the conversation.
    async fn advance(&self, state: &mut StepState, turn: &TurnInput<'_>) -> anyhow::Result<Outcome>;
}

/// Immutable named dialogue definition. Many conversations share one template.
pub struct Template {
    name: Option<String>,
    body: Arc<dyn Dialogue>,
}

impl Template {
    /// Create a template; the body is not invoked.
    pub fn build(name: Option<&str>, body: impl Dialogue + 'static) -> Arc<Self> {
        Arc::new(Self {
            name: name.map(str::to_string),
            body: Arc::new(body),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn body(&self) -> &dyn Dialogue {
        self.body.as_ref()
    }

    /// Route `message` to this template's conversation for the sender, creating it if needed.
    pub async fn start<M: MessageAdapter + ?Sized>(
        self: &Arc<Self>,
        registry: &Arc<Registry>,
        message: &M,
        options: &Arc<Options>,
    ) -> Result<Dispatched, DispatchError> {
        Dispatcher::new(registry.clone())
            .dispatch(self, message, options)
            .await
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
