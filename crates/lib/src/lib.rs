//! Converse core library: conversation registry and turn dispatch for multi-turn dialogues
//! between an agent and individual users in chat channels.
//!
//! A [`Template`] is defined once. The first qualifying message from a user in a channel creates a
//! [`Conversation`] in the shared [`Registry`]; later messages from the same user in the same channel
//! resume it, one step per message, until its body reports [`Outcome::Finished`].

pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod eviction;
pub mod message;
pub mod options;
pub mod registry;
pub mod template;

pub use conversation::{Conversation, ConversationId, ConversationKey, ConversationState};
pub use dispatch::{DispatchError, Dispatched, Dispatcher};
pub use eviction::{spawn_idle_sweeper, IdlePolicy};
pub use message::{Identity, InboundMessage, MessageAdapter};
pub use options::Options;
pub use registry::{Registry, RegistryError};
pub use template::{
    CatalogError, Dialogue, Outcome, Script, StepAction, StepState, Template, TemplateCatalog,
    TurnInput,
};
