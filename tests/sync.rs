//! Waiting-call channel sync tests
//!
//! The sync step is the system's reconciliation loop: these tests pin the
//! edit-else-send algorithm, reference persistence, and idempotence.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use sellio_gateway::db::{ConversationRepo, IntegrationRepo, MessageRepo, MessageSender};
use sellio_gateway::event::Platform;
use sellio_gateway::status::ConversationStatus;
use sellio_gateway::sync::{NotificationTransport, SentCard, WaitingCallSync};
use sellio_gateway::{Error, Result};

mod common;
use common::{create_test_integration, setup_test_db};

struct MockNotifier {
    edits: Mutex<Vec<(i64, String)>>,
    sends: Mutex<Vec<(String, String)>>,
    fail_edits: AtomicBool,
    next_message_id: AtomicI64,
}

impl MockNotifier {
    fn new() -> Self {
        Self {
            edits: Mutex::new(Vec::new()),
            sends: Mutex::new(Vec::new()),
            fail_edits: AtomicBool::new(false),
            next_message_id: AtomicI64::new(500),
        }
    }

    fn edits(&self) -> Vec<(i64, String)> {
        self.edits.lock().unwrap().clone()
    }

    fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for MockNotifier {
    async fn edit_card(&self, _chat_id: &str, message_id: i64, text: &str) -> Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(Error::Channel("message to edit not found".into()));
        }
        self.edits.lock().unwrap().push((message_id, text.to_string()));
        Ok(())
    }

    async fn send_card(&self, chat_id: &str, text: &str) -> Result<SentCard> {
        self.sends.lock().unwrap().push((chat_id.to_string(), text.to_string()));
        Ok(SentCard {
            chat_id: chat_id.to_string(),
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }
}

struct Harness {
    sync: WaitingCallSync,
    conversations: ConversationRepo,
    messages: MessageRepo,
    notifier: Arc<MockNotifier>,
    conversation_id: String,
}

fn harness() -> Harness {
    let pool = setup_test_db();
    let integration = create_test_integration(&pool, Platform::TelegramBusiness);

    let conversations = ConversationRepo::new(pool.clone());
    let messages = MessageRepo::new(pool.clone());
    let conversation = conversations
        .find_or_create(&integration.id, "555100", "Борис")
        .unwrap();

    let notifier = Arc::new(MockNotifier::new());
    let notifier_dyn: Arc<dyn NotificationTransport> = notifier.clone();

    let sync = WaitingCallSync::new(
        conversations.clone(),
        messages.clone(),
        IntegrationRepo::new(pool),
        Some(notifier_dyn),
        Some("-100777".into()),
    );

    Harness {
        sync,
        conversations,
        messages,
        notifier,
        conversation_id: conversation.id,
    }
}

fn seed_message(h: &Harness, content: &str) {
    h.messages
        .append(
            &h.conversation_id,
            MessageSender::Customer,
            content,
            Some("m1"),
            &serde_json::json!({"username": "boris"}),
        )
        .unwrap();
}

#[tokio::test]
async fn noop_without_ref_when_not_waiting() {
    let h = harness();

    h.sync.reconcile(&h.conversation_id).await.unwrap();

    assert!(h.notifier.edits().is_empty());
    assert!(h.notifier.sends().is_empty());
}

#[tokio::test]
async fn fresh_send_creates_card_and_persists_ref() {
    let h = harness();
    seed_message(&h, "жду звонка, телефон +998901112233");
    h.conversations
        .update_status(&h.conversation_id, ConversationStatus::WaitingCall)
        .unwrap();

    h.sync.reconcile(&h.conversation_id).await.unwrap();

    let sends = h.notifier.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].0, "-100777");

    let card = &sends[0].1;
    assert!(card.contains("Анкета клиента"));
    assert!(card.contains("Борис"));
    assert!(card.contains("+998901112233"));
    assert!(card.contains("@boris"));
    assert!(card.contains("Ждет звонка"));
    assert!(card.contains("Telegram"));

    let conversation = h.conversations.get(&h.conversation_id).unwrap().unwrap();
    assert_eq!(conversation.waiting_call_chat_id.as_deref(), Some("-100777"));
    assert_eq!(conversation.waiting_call_message_id, Some(500));
}

#[tokio::test]
async fn repeated_reconcile_edits_in_place() {
    let h = harness();
    seed_message(&h, "+998901112233");
    h.conversations
        .update_status(&h.conversation_id, ConversationStatus::WaitingCall)
        .unwrap();

    h.sync.reconcile(&h.conversation_id).await.unwrap();
    h.sync.reconcile(&h.conversation_id).await.unwrap();
    h.sync.reconcile(&h.conversation_id).await.unwrap();

    // One send, then edits of the same message; a no-op edit never cascades
    // into another send
    assert_eq!(h.notifier.sends().len(), 1);
    let edits = h.notifier.edits();
    assert_eq!(edits.len(), 2);
    assert!(edits.iter().all(|(id, _)| *id == 500));
}

#[tokio::test]
async fn failed_edit_falls_through_to_send_while_waiting() {
    let h = harness();
    seed_message(&h, "+998901112233");
    h.conversations
        .update_status(&h.conversation_id, ConversationStatus::WaitingCall)
        .unwrap();
    // A card existed once but is gone on the provider side
    h.conversations
        .set_waiting_call_ref(&h.conversation_id, "-100777", 42)
        .unwrap();
    h.notifier.fail_edits.store(true, Ordering::SeqCst);

    h.sync.reconcile(&h.conversation_id).await.unwrap();

    assert_eq!(h.notifier.sends().len(), 1);
    let conversation = h.conversations.get(&h.conversation_id).unwrap().unwrap();
    assert_eq!(conversation.waiting_call_message_id, Some(500));
}

#[tokio::test]
async fn stale_card_is_not_recreated_after_leaving_waiting() {
    let h = harness();
    seed_message(&h, "+998901112233");
    h.conversations
        .update_status(&h.conversation_id, ConversationStatus::ClosedWon)
        .unwrap();
    h.conversations
        .set_waiting_call_ref(&h.conversation_id, "-100777", 42)
        .unwrap();
    h.notifier.fail_edits.store(true, Ordering::SeqCst);

    // Edit fails and status is no longer waiting_call: tolerate staleness,
    // never send a new card
    h.sync.reconcile(&h.conversation_id).await.unwrap();

    assert!(h.notifier.sends().is_empty());
}

#[tokio::test]
async fn existing_card_still_updates_after_status_moves_on() {
    let h = harness();
    seed_message(&h, "+998901112233");
    h.conversations
        .update_status(&h.conversation_id, ConversationStatus::WaitingCall)
        .unwrap();

    h.sync.reconcile(&h.conversation_id).await.unwrap();

    // Operator closed the deal; the card keeps reflecting current state
    h.conversations
        .update_status(&h.conversation_id, ConversationStatus::ClosedWon)
        .unwrap();
    h.sync.reconcile(&h.conversation_id).await.unwrap();

    let edits = h.notifier.edits();
    assert_eq!(edits.len(), 1);
    assert!(edits[0].1.contains("Продажа"));
    assert_eq!(h.notifier.sends().len(), 1);
}
