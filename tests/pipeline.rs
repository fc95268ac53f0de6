//! Pipeline integration tests
//!
//! Exercise ingestion end to end against an in-memory store with mock
//! responder, reply transport, and notification transport.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use sellio_gateway::channels::ReplyTransport;
use sellio_gateway::db::{
    Conversation, ConversationRepo, Integration, IntegrationRepo, MessageRepo, MessageSender,
};
use sellio_gateway::event::{InboundEvent, Platform};
use sellio_gateway::pipeline::{Ingestion, Pipeline};
use sellio_gateway::responder::{FALLBACK_REPLY, Responder, ResponderRequest};
use sellio_gateway::status::ConversationStatus;
use sellio_gateway::sync::{NotificationTransport, SentCard, WaitingCallSync};
use sellio_gateway::{Error, Result};

mod common;
use common::{create_test_integration, setup_test_db};

/// Scripted responder; `None` reply simulates a remote failure
struct MockResponder {
    reply: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockResponder {
    fn replying(text: &str) -> Self {
        Self {
            reply: Mutex::new(Some(text.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            reply: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn generate(&self, _request: ResponderRequest<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Responder("mock responder down".into()))
    }
}

/// Records outbound sends instead of calling a platform
#[derive(Default)]
struct MockTransport {
    sent: Mutex<Vec<String>>,
}

impl MockTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyTransport for MockTransport {
    async fn send_reply(
        &self,
        _integration: &Integration,
        _conversation: &Conversation,
        text: &str,
        _connection_id: Option<&str>,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Records notification-channel calls
struct MockNotifier {
    edits: Mutex<Vec<(i64, String)>>,
    sends: Mutex<Vec<String>>,
    fail_edits: AtomicBool,
    next_message_id: AtomicI64,
}

impl MockNotifier {
    fn new() -> Self {
        Self {
            edits: Mutex::new(Vec::new()),
            sends: Mutex::new(Vec::new()),
            fail_edits: AtomicBool::new(false),
            next_message_id: AtomicI64::new(100),
        }
    }

    fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }

    fn edited_message_ids(&self) -> Vec<i64> {
        self.edits.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

#[async_trait]
impl NotificationTransport for MockNotifier {
    async fn edit_card(&self, _chat_id: &str, message_id: i64, text: &str) -> Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(Error::Channel("edit rejected".into()));
        }
        self.edits.lock().unwrap().push((message_id, text.to_string()));
        Ok(())
    }

    async fn send_card(&self, chat_id: &str, text: &str) -> Result<SentCard> {
        self.sends.lock().unwrap().push(text.to_string());
        Ok(SentCard {
            chat_id: chat_id.to_string(),
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }
}

struct Harness {
    pipeline: Pipeline,
    integration: Integration,
    conversations: ConversationRepo,
    messages: MessageRepo,
    responder: Arc<MockResponder>,
    transport: Arc<MockTransport>,
    notifier: Arc<MockNotifier>,
}

fn harness(responder: MockResponder) -> Harness {
    let pool = setup_test_db();
    let integration = create_test_integration(&pool, Platform::TelegramBusiness);

    let integrations = IntegrationRepo::new(pool.clone());
    let conversations = ConversationRepo::new(pool.clone());
    let messages = MessageRepo::new(pool.clone());

    let responder = Arc::new(responder);
    let transport = Arc::new(MockTransport::default());
    let notifier = Arc::new(MockNotifier::new());

    let notifier_dyn: Arc<dyn NotificationTransport> = notifier.clone();
    let sync = WaitingCallSync::new(
        conversations.clone(),
        messages.clone(),
        integrations,
        Some(notifier_dyn),
        Some("-100777".into()),
    );

    let pipeline = Pipeline::new(
        conversations.clone(),
        messages.clone(),
        responder.clone(),
        transport.clone(),
        sync,
        10,
    );

    Harness {
        pipeline,
        integration,
        conversations,
        messages,
        responder,
        transport,
        notifier,
    }
}

fn event(provider_message_id: &str, text: &str) -> InboundEvent {
    InboundEvent {
        platform: Platform::TelegramBusiness,
        external_chat_id: "555001".into(),
        provider_message_id: provider_message_id.into(),
        sender_name: "Анна".into(),
        sender_username: Some("anna".into()),
        text: text.into(),
        connection_id: None,
    }
}

fn conversation(h: &Harness) -> Conversation {
    h.conversations
        .find_or_create(&h.integration.id, "555001", "Анна")
        .unwrap()
}

#[tokio::test]
async fn first_contact_creates_conversation_and_replies() {
    let h = harness(MockResponder::replying("Добрый день! Чем могу помочь?"));

    let outcome = h.pipeline.ingest(&h.integration, &event("1", "Здравствуйте")).await.unwrap();
    let Ingestion::Processed { conversation_id, replied } = outcome else {
        panic!("expected processed outcome");
    };
    assert!(replied);

    let conversation = h.conversations.get(&conversation_id).unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::New);
    assert_eq!(conversation.customer_name.as_deref(), Some("Анна"));

    let history = h.messages.recent(&conversation_id, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sender, MessageSender::Customer);
    assert_eq!(history[0].provider_message_id.as_deref(), Some("1"));
    assert_eq!(history[1].sender, MessageSender::Assistant);

    assert_eq!(h.responder.calls(), 1);
    assert_eq!(h.transport.sent(), vec!["Добрый день! Чем могу помочь?"]);
    // Not waiting for a call, so no card
    assert_eq!(h.notifier.send_count(), 0);
}

#[tokio::test]
async fn duplicate_delivery_is_short_circuited() {
    let h = harness(MockResponder::replying("Ответ"));

    let first = h.pipeline.ingest(&h.integration, &event("7", "Вопрос")).await.unwrap();
    assert!(matches!(first, Ingestion::Processed { .. }));

    let second = h.pipeline.ingest(&h.integration, &event("7", "Вопрос")).await.unwrap();
    assert_eq!(second, Ingestion::Duplicate);

    let conversation = conversation(&h);
    let customer_rows = h
        .messages
        .recent(&conversation.id, 50)
        .unwrap()
        .into_iter()
        .filter(|m| m.sender == MessageSender::Customer)
        .count();
    assert_eq!(customer_rows, 1);
    assert_eq!(h.responder.calls(), 1);
}

#[tokio::test]
async fn phone_rule_forces_waiting_call_and_suppresses_responder() {
    let h = harness(MockResponder::replying("[[UPDATE_STATUS:closed_won]]Спасибо!"));

    let outcome = h
        .pipeline
        .ingest(&h.integration, &event("2", "+998901112233"))
        .await
        .unwrap();
    let Ingestion::Processed { conversation_id, replied } = outcome else {
        panic!("expected processed outcome");
    };

    // The rule wins over whatever the responder would have directed: the
    // responder never even ran for this message.
    assert!(!replied);
    assert_eq!(h.responder.calls(), 0);

    let conversation = h.conversations.get(&conversation_id).unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::WaitingCall);
    assert_eq!(conversation.lead_profile.phone.as_deref(), Some("+998901112233"));

    // Message is still stored, and the waiting-call card was created
    assert_eq!(h.messages.count(&conversation_id).unwrap(), 1);
    assert_eq!(h.notifier.send_count(), 1);
    assert_eq!(conversation.waiting_call_message_id, Some(100));
}

#[tokio::test]
async fn suppressed_status_stores_messages_without_ai() {
    let h = harness(MockResponder::replying("Ответ"));

    let conversation = conversation(&h);
    h.conversations
        .update_status(&conversation.id, ConversationStatus::Scheduled)
        .unwrap();

    let outcome = h.pipeline.ingest(&h.integration, &event("3", "Я на месте")).await.unwrap();
    assert!(matches!(outcome, Ingestion::Processed { replied: false, .. }));

    assert_eq!(h.responder.calls(), 0);
    assert_eq!(h.messages.count(&conversation.id).unwrap(), 1);
    let reloaded = h.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(reloaded.status, ConversationStatus::Scheduled);
}

#[tokio::test]
async fn ai_directive_updates_status_and_strips_token() {
    let h = harness(MockResponder::replying(
        "[[UPDATE_STATUS:interested]]Расскажу подробнее о ценах.",
    ));

    let outcome = h
        .pipeline
        .ingest(&h.integration, &event("4", "Сколько стоит станция?"))
        .await
        .unwrap();
    let Ingestion::Processed { conversation_id, replied } = outcome else {
        panic!("expected processed outcome");
    };
    assert!(replied);

    let conversation = h.conversations.get(&conversation_id).unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::Interested);

    // Token never reaches the customer or the stored history
    assert_eq!(h.transport.sent(), vec!["Расскажу подробнее о ценах."]);
    let history = h.messages.recent(&conversation_id, 10).unwrap();
    assert_eq!(history[1].content, "Расскажу подробнее о ценах.");
}

#[tokio::test]
async fn directive_only_reply_records_placeholder() {
    let h = harness(MockResponder::replying("[[UPDATE_STATUS:closed_lost]]"));

    let outcome = h.pipeline.ingest(&h.integration, &event("5", "Не интересно")).await.unwrap();
    let Ingestion::Processed { conversation_id, replied } = outcome else {
        panic!("expected processed outcome");
    };

    assert!(!replied);
    assert!(h.transport.sent().is_empty());

    let conversation = h.conversations.get(&conversation_id).unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::ClosedLost);

    let history = h.messages.recent(&conversation_id, 10).unwrap();
    assert_eq!(history[1].sender, MessageSender::Assistant);
    assert_eq!(history[1].content, "(Status Update Only)");
}

#[tokio::test]
async fn responder_failure_falls_back_without_status_change() {
    let h = harness(MockResponder::failing());

    let outcome = h.pipeline.ingest(&h.integration, &event("6", "Вопрос")).await.unwrap();
    let Ingestion::Processed { conversation_id, replied } = outcome else {
        panic!("expected processed outcome");
    };
    assert!(replied);

    assert_eq!(h.transport.sent(), vec![FALLBACK_REPLY]);
    let conversation = h.conversations.get(&conversation_id).unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::New);

    let history = h.messages.recent(&conversation_id, 10).unwrap();
    assert_eq!(history[1].content, FALLBACK_REPLY);
}

#[tokio::test]
async fn phone_rule_reopens_closed_conversation() {
    // The transition graph is permissive on purpose: the phone rule may pull
    // a closed conversation back to waiting_call.
    let h = harness(MockResponder::replying("Ответ"));

    let conversation = conversation(&h);
    h.conversations
        .update_status(&conversation.id, ConversationStatus::ClosedLost)
        .unwrap();

    h.pipeline
        .ingest(&h.integration, &event("8", "передумал, вот номер +998901112233"))
        .await
        .unwrap();

    let reloaded = h.conversations.get(&conversation.id).unwrap().unwrap();
    assert_eq!(reloaded.status, ConversationStatus::WaitingCall);
}

#[tokio::test]
async fn waiting_call_card_is_edited_in_place_on_later_messages() {
    let h = harness(MockResponder::replying("Ответ"));

    // Message 1: ordinary question, AI replies
    h.pipeline.ingest(&h.integration, &event("10", "Здравствуйте")).await.unwrap();
    assert_eq!(h.responder.calls(), 1);

    // Message 2: phone number - card created
    h.pipeline.ingest(&h.integration, &event("11", "+998901112233")).await.unwrap();
    assert_eq!(h.notifier.send_count(), 1);

    // Message 3: unrelated text - no AI, same card edited in place
    h.pipeline.ingest(&h.integration, &event("12", "когда позвоните?")).await.unwrap();
    assert_eq!(h.responder.calls(), 1);
    assert_eq!(h.notifier.send_count(), 1);
    assert_eq!(h.notifier.edited_message_ids(), vec![100]);

    let conversation = conversation(&h);
    assert_eq!(conversation.waiting_call_message_id, Some(100));
    assert_eq!(h.messages.count(&conversation.id).unwrap(), 4);
}

#[tokio::test]
async fn profile_accumulates_across_messages() {
    let h = harness(MockResponder::replying("Ответ"));

    h.pipeline
        .ingest(&h.integration, &event("20", "нужна станция для дома, мощность: 10 кВт"))
        .await
        .unwrap();
    h.pipeline
        .ingest(&h.integration, &event("21", "панели поставим на крышу"))
        .await
        .unwrap();

    let conversation = conversation(&h);
    let profile = &conversation.lead_profile;
    assert_eq!(profile.power.as_deref(), Some("10 кВт"));
    assert!(profile.client_type.is_some());
    assert!(profile.installation_surface.is_some());
    assert_eq!(profile.username.as_deref(), Some("@anna"));
}

#[tokio::test]
async fn ai_disabled_integration_stores_without_reply() {
    let pool = setup_test_db();
    let mut integration = Integration::new(Platform::TelegramBusiness);
    integration.ai_enabled = false;
    IntegrationRepo::new(pool.clone()).insert(&integration).unwrap();

    let integrations = IntegrationRepo::new(pool.clone());
    let conversations = ConversationRepo::new(pool.clone());
    let messages = MessageRepo::new(pool.clone());
    let responder = Arc::new(MockResponder::replying("Ответ"));
    let transport = Arc::new(MockTransport::default());
    let sync = WaitingCallSync::new(
        conversations.clone(),
        messages.clone(),
        integrations,
        None,
        None,
    );
    let pipeline = Pipeline::new(
        conversations,
        messages.clone(),
        responder.clone(),
        transport,
        sync,
        10,
    );

    let outcome = pipeline.ingest(&integration, &event("1", "Здравствуйте")).await.unwrap();
    let Ingestion::Processed { conversation_id, replied } = outcome else {
        panic!("expected processed outcome");
    };

    assert!(!replied);
    assert_eq!(responder.calls(), 0);
    assert_eq!(messages.count(&conversation_id).unwrap(), 1);
}
