//! Integration test: the create -> resume -> finish -> recreate lifecycle through `Template::start`,
//! author filtering, error cleanup and identity extraction.

use async_trait::async_trait;
use converse::{
    DispatchError, Dispatched, Dialogue, InboundMessage, MessageAdapter, Options, Outcome,
    Registry, RegistryError, StepState, Template, TurnInput,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Suspends on the first turn, finishes on the second. Counts body invocations.
struct TwoTurns {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Dialogue for TwoTurns {
    async fn advance(&self, state: &mut StepState, turn: &TurnInput<'_>) -> anyhow::Result<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match state.stage() {
            None => {
                state.set_stage("awaiting_reply");
                state.put("first_text", turn.text)?;
                Ok(Outcome::Suspended)
            }
            Some(_) => Ok(Outcome::Finished),
        }
    }
}

fn setup() -> (Arc<Registry>, Arc<Template>, Arc<Options>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let template = Template::build(Some("two_turns"), TwoTurns { calls: calls.clone() });
    let options = Arc::new(Options::new().with_author_id("BOT"));
    (Arc::new(Registry::new()), template, options, calls)
}

fn advanced(d: Dispatched) -> (converse::ConversationId, bool, Outcome) {
    match d {
        Dispatched::Advanced {
            conversation,
            created,
            outcome,
        } => (conversation, created, outcome),
        Dispatched::SelfAuthored => panic!("expected the conversation to advance"),
    }
}

#[tokio::test]
async fn suspend_finish_and_restart_scenario() {
    let (registry, template, options, calls) = setup();
    let msg = InboundMessage::new("U1", "C1", "hello");
    let from_bot = InboundMessage::new("BOT", "C1", "I am the bot");

    let (first_id, created, outcome) =
        advanced(template.start(&registry, &msg, &options).await.unwrap());
    assert!(created);
    assert_eq!(outcome, Outcome::Suspended);
    assert_eq!(registry.len().await, 1);
    let conv = registry.find("U1", "C1").await.unwrap();
    assert_eq!(conv.id(), first_id);
    assert_eq!(conv.state(), converse::ConversationState::Suspended);
    assert_eq!(conv.template().name(), Some("two_turns"));
    assert_eq!(
        conv.snapshot().await.get::<String>("first_text").as_deref(),
        Some("hello")
    );

    // The bot's own message changes nothing.
    assert_eq!(
        template.start(&registry, &from_bot, &options).await.unwrap(),
        Dispatched::SelfAuthored
    );
    assert_eq!(registry.len().await, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (second_id, created, outcome) =
        advanced(template.start(&registry, &msg, &options).await.unwrap());
    assert_eq!(second_id, first_id);
    assert!(!created);
    assert_eq!(outcome, Outcome::Finished);
    assert_eq!(registry.len().await, 0);
    assert_eq!(conv.state(), converse::ConversationState::Finished);

    let (third_id, created, outcome) =
        advanced(template.start(&registry, &msg, &options).await.unwrap());
    assert!(created);
    assert_ne!(third_id, first_id);
    assert_eq!(outcome, Outcome::Suspended);
    assert_eq!(registry.len().await, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn keys_are_independent_per_user_and_channel() {
    let (registry, template, options, _) = setup();
    for (user, channel) in [("U1", "C1"), ("U1", "C2"), ("U2", "C1")] {
        let msg = InboundMessage::new(user, channel, "hi");
        let (_, created, _) = advanced(template.start(&registry, &msg, &options).await.unwrap());
        assert!(created);
    }
    assert_eq!(registry.len().await, 3);

    registry.reset().await;
    assert_eq!(registry.len().await, 0);
}

#[tokio::test]
async fn author_filter_applies_before_any_conversation_exists() {
    let (registry, template, options, calls) = setup();
    for _ in 0..3 {
        let out = template
            .start(&registry, &InboundMessage::new("BOT", "C1", "ping"), &options)
            .await
            .unwrap();
        assert_eq!(out, Dispatched::SelfAuthored);
    }
    assert!(registry.is_empty().await);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct FailOnSecond;

#[async_trait]
impl Dialogue for FailOnSecond {
    async fn advance(&self, state: &mut StepState, _: &TurnInput<'_>) -> anyhow::Result<Outcome> {
        if state.stage().is_some() {
            anyhow::bail!("lost track of the order");
        }
        state.set_stage("started");
        Ok(Outcome::Suspended)
    }
}

#[tokio::test]
async fn failed_dialogue_is_removed_and_next_message_starts_fresh() {
    let registry = Arc::new(Registry::new());
    let template = Template::build(Some("fail_on_second"), FailOnSecond);
    let options = Arc::new(Options::new());
    let msg = InboundMessage::new("U1", "C1", "order pizza");

    let (first_id, _, _) = advanced(template.start(&registry, &msg, &options).await.unwrap());
    let err = template.start(&registry, &msg, &options).await.unwrap_err();
    assert!(matches!(err, DispatchError::TemplateExecution { .. }));
    assert!(err.to_string().contains("lost track of the order"));
    assert!(registry.is_empty().await);

    let (next_id, created, outcome) =
        advanced(template.start(&registry, &msg, &options).await.unwrap());
    assert!(created);
    assert_ne!(next_id, first_id);
    assert_eq!(outcome, Outcome::Suspended);
}

/// Suspends until told "crash", then panics.
struct PanicOnCrash;

#[async_trait]
impl Dialogue for PanicOnCrash {
    async fn advance(&self, _: &mut StepState, turn: &TurnInput<'_>) -> anyhow::Result<Outcome> {
        if turn.text == "crash" {
            panic!("dialogue state corrupted");
        }
        Ok(Outcome::Suspended)
    }
}

#[tokio::test]
async fn panicking_dialogue_is_unregistered_and_next_message_starts_fresh() {
    let registry = Arc::new(Registry::new());
    let template = Template::build(Some("panic_on_crash"), PanicOnCrash);
    let options = Arc::new(Options::new());

    let (first_id, _, _) = advanced(
        template
            .start(&registry, &InboundMessage::new("U1", "C1", "hello"), &options)
            .await
            .unwrap(),
    );
    let err = template
        .start(&registry, &InboundMessage::new("U1", "C1", "crash"), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::TemplateExecution { .. }));
    assert!(err.to_string().contains("dialogue state corrupted"));
    assert!(!registry.is_registered("U1", "C1").await);

    let (next_id, created, outcome) = advanced(
        template
            .start(&registry, &InboundMessage::new("U1", "C1", "hello"), &options)
            .await
            .unwrap(),
    );
    assert!(created);
    assert_ne!(next_id, first_id);
    assert_eq!(outcome, Outcome::Suspended);
}

#[tokio::test]
async fn retired_conversation_cannot_be_registered_again() {
    let (registry, template, options, _) = setup();
    let msg = InboundMessage::new("U1", "C1", "hello");

    let (first_id, _, _) = advanced(template.start(&registry, &msg, &options).await.unwrap());
    let conv = registry.find("U1", "C1").await.unwrap();
    registry.reset().await;
    assert_eq!(
        registry.register(conv).await.unwrap_err(),
        RegistryError::Finished(first_id)
    );

    let (next_id, created, outcome) = advanced(
        tokio::time::timeout(Duration::from_secs(2), template.start(&registry, &msg, &options))
            .await
            .expect("dispatch must resolve after a reset")
            .unwrap(),
    );
    assert!(created);
    assert_ne!(next_id, first_id);
    assert_eq!(outcome, Outcome::Suspended);
    assert_eq!(registry.len().await, 1);
}

/// Adapter that counts identity lookups.
struct CountingMessage {
    user_reads: AtomicUsize,
    channel_reads: AtomicUsize,
}

impl MessageAdapter for CountingMessage {
    fn user_id(&self) -> String {
        self.user_reads.fetch_add(1, Ordering::SeqCst);
        "U1".to_string()
    }

    fn channel_id(&self) -> String {
        self.channel_reads.fetch_add(1, Ordering::SeqCst);
        "C1".to_string()
    }

    fn text(&self) -> &str {
        "hello"
    }
}

#[tokio::test]
async fn identity_is_read_once_per_dispatch() {
    let (registry, template, options, _) = setup();
    let msg = CountingMessage {
        user_reads: AtomicUsize::new(0),
        channel_reads: AtomicUsize::new(0),
    };

    template.start(&registry, &msg, &options).await.unwrap();
    assert_eq!(msg.user_reads.load(Ordering::SeqCst), 1);
    assert_eq!(msg.channel_reads.load(Ordering::SeqCst), 1);

    template.start(&registry, &msg, &options).await.unwrap();
    assert_eq!(msg.user_reads.load(Ordering::SeqCst), 2);
    assert_eq!(msg.channel_reads.load(Ordering::SeqCst), 2);
}
