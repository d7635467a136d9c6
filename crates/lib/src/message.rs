//! Inbound messages and the adapter the core reads identity through.
//!
//! Platform connectors implement [`MessageAdapter`] for their own message type; the core never looks
//! at raw platform payloads. [`InboundMessage`] is the plain in-process form.

/// Read-only view of an inbound chat message.
///
/// `user_id` and `channel_id` may be expensive (lookups, decoding) so callers in this crate extract
/// them once per dispatch via [`Identity::extract`].
pub trait MessageAdapter: Send + Sync {
    /// Author of the message.
    fn user_id(&self) -> String;
    /// Channel (chat, room, DM) the message was posted in.
    fn channel_id(&self) -> String;
    /// Message body, consumed by dialogue bodies.
    fn text(&self) -> &str;
}

/// A message from a channel to be routed to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: String,
    pub channel_id: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            text: text.into(),
        }
    }
}

impl MessageAdapter for InboundMessage {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn channel_id(&self) -> String {
        self.channel_id.clone()
    }

    fn text(&self) -> &str {
        &self.text
    }
}

/// Identity extracted from one message: who wrote it and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub channel_id: String,
}

impl Identity {
    /// Read the identity from the adapter, calling each accessor exactly once.
    pub fn extract<M: MessageAdapter + ?Sized>(message: &M) -> Self {
        Self {
            user_id: message.user_id(),
            channel_id: message.channel_id(),
        }
    }
}
