//! Turn dispatch: route one inbound message to its conversation and advance it one step.
//!
//! Per message: extract identity once, drop messages written by the agent itself, resume the
//! conversation registered for (user, channel) or create and register a new one, advance it, and
//! unregister it when it finishes or its body fails.

use crate::conversation::{Conversation, ConversationId, ConversationKey};
use crate::message::{Identity, MessageAdapter};
use crate::options::Options;
use crate::registry::Registry;
use crate::template::{Outcome, Template};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The template body failed; the conversation has already been removed from the registry.
    #[error("dialogue '{template}' failed for {key}: {source:#}")]
    TemplateExecution {
        template: String,
        key: ConversationKey,
        #[source]
        source: anyhow::Error,
    },
}

/// What a dispatch did with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Sent by the agent itself; nothing was created or advanced.
    SelfAuthored,
    /// The conversation took one turn.
    Advanced {
        conversation: ConversationId,
        /// True when this message started the conversation.
        created: bool,
        outcome: Outcome,
    },
}

/// Routes messages to conversations in a shared [`Registry`].
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Dispatch `message`. A new conversation is built from `template` and snapshots `options`;
    /// a resumed one keeps the template and options it was created with.
    pub async fn dispatch<M: MessageAdapter + ?Sized>(
        &self,
        template: &Arc<Template>,
        message: &M,
        options: &Arc<Options>,
    ) -> Result<Dispatched, DispatchError> {
        let identity = Identity::extract(message);
        if options.is_author(&identity.user_id) {
            log::trace!("dispatch: ignoring message from author {}", identity.user_id);
            return Ok(Dispatched::SelfAuthored);
        }
        let key = ConversationKey::from(identity);

        loop {
            let (conversation, created) = self
                .registry
                .resume_or_create(&key, || {
                    Conversation::new(template.clone(), key.clone(), options.clone())
                })
                .await;
            if created {
                log::debug!("dispatch: created conversation {} for {}", conversation.id(), key);
            } else {
                log::debug!("dispatch: resuming conversation {} for {}", conversation.id(), key);
            }

            // A turn queued behind the last one may find the conversation finished, and a dispatch
            // cancelled before unregistering leaves one behind. Drop it and resolve again.
            let Some(turn) = conversation.acquire().await else {
                log::debug!(
                    "dispatch: conversation {} finished while waiting, resolving {} again",
                    conversation.id(),
                    key
                );
                self.registry.unregister(&conversation).await;
                continue;
            };

            let advanced = turn.advance(message.text()).await;
            if advanced.is_terminal() {
                self.registry.unregister(&conversation).await;
                log::debug!("dispatch: retired conversation {} for {}", conversation.id(), key);
            }

            return match advanced.into_result() {
                Ok(outcome) => Ok(Dispatched::Advanced {
                    conversation: conversation.id(),
                    created,
                    outcome,
                }),
                Err(source) => {
                    let template = conversation
                        .template()
                        .name()
                        .unwrap_or("unnamed")
                        .to_string();
                    log::warn!("dispatch: dialogue '{}' failed for {}: {:#}", template, key, source);
                    Err(DispatchError::TemplateExecution {
                        template,
                        key,
                        source,
                    })
                }
            };
        }
    }
}
