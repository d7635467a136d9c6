//! Dispatch options: the configuration snapshot a conversation captures when it is created.
//!
//! Only `authorId` is interpreted by the core. Every other key is carried untouched to dialogue
//! bodies through [`TurnInput::options`](crate::template::TurnInput).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable options snapshot. Build with [`Options::new`] and the `with_*` methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Identity of the agent itself; messages from it never start or advance a dialogue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author_id: Option<String>,
    /// Pass-through settings for dialogue bodies.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author_id(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    /// Add a pass-through setting. `authorId` is reserved and routed to [`Options::with_author_id`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == "authorId" {
            self.author_id = value.as_str().map(str::to_string);
        } else {
            self.extra.insert(key, value);
        }
        self
    }

    pub fn author_id(&self) -> Option<&str> {
        self.author_id.as_deref()
    }

    /// Look up a pass-through setting.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// True when `user_id` is the agent itself.
    pub fn is_author(&self, user_id: &str) -> bool {
        self.author_id.as_deref() == Some(user_id)
    }
}
