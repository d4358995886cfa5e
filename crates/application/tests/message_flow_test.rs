//! 消息投递与实时连接集成测试
//!
//! 覆盖：参与者校验、持久化先于广播、缓存读写顺序、已读回执范围、
//! 故障注入（缓存失败 / 持久化失败），以及连接 actor 的完整生命周期。

mod support;

use std::sync::Arc;
use std::time::Duration;

use application::{
    repository::memory::InMemoryStorage, ApplicationError, ClientCommand, KeyValueStore,
    MessageRepository, ServerEvent, StoreError,
};
use async_trait::async_trait;
use domain::{
    ConversationId, DeliveryStatus, DomainError, Message, MessageId, PresenceStatus,
    RepositoryError, UserId,
};
use support::ChatHarness;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

mockall::mock! {
    pub Store {}

    #[async_trait]
    impl KeyValueStore for Store {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
        async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
        async fn delete(&self, key: &str) -> Result<(), StoreError>;
        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;
    }
}

mockall::mock! {
    pub Messages {}

    #[async_trait]
    impl MessageRepository for Messages {
        async fn save_message(&self, message: Message) -> Result<Message, RepositoryError>;
        async fn find_by_ids(&self, ids: &[MessageId]) -> Result<Vec<Message>, RepositoryError>;
        async fn list_by_conversation(
            &self,
            conversation_id: ConversationId,
        ) -> Result<Vec<Message>, RepositoryError>;
        async fn advance_status(
            &self,
            ids: &[MessageId],
            status: DeliveryStatus,
        ) -> Result<u64, RepositoryError>;
    }
}

struct Client {
    commands: mpsc::Sender<ClientCommand>,
    events: mpsc::Receiver<ServerEvent>,
    task: JoinHandle<()>,
}

async fn connect(harness: &ChatHarness, user_id: UserId) -> Client {
    let actor = harness.realtime.open(user_id).await.unwrap();
    let (commands, inbound) = mpsc::channel(16);
    let (outbound, events) = mpsc::channel(64);
    let task = tokio::spawn(actor.run(inbound, outbound));
    Client {
        commands,
        events,
        task,
    }
}

async fn next_event(events: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("connection closed")
}

async fn assert_silent(events: &mut mpsc::Receiver<ServerEvent>) {
    let received = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
    assert!(received.is_err(), "unexpected event: {received:?}");
}

#[tokio::test]
async fn two_members_receive_message_then_delivered_status() {
    let harness = ChatHarness::new();
    let alice = UserId::generate();
    let bob = UserId::generate();
    let conversation_id = harness.conversation_with(&[alice, bob]);

    let mut bob_client = connect(&harness, bob).await;
    let mut alice_client = connect(&harness, alice).await;
    assert_eq!(
        next_event(&mut bob_client.events).await,
        ServerEvent::UserOnline { user_id: alice }
    );
    assert!(harness.presence.is_online(alice).await.unwrap());

    alice_client
        .commands
        .send(ClientCommand::SendMessage {
            content: "  hi  ".to_string(),
            conversation_id,
            request_id: Some("r1".to_string()),
        })
        .await
        .unwrap();

    // 发送者先收到 ack，随后和其他成员一样收到房间广播
    let (request_id, acked) = match next_event(&mut alice_client.events).await {
        ServerEvent::Ack {
            request_id,
            success: true,
            message: Some(acked),
            ..
        } => (request_id, acked),
        other => panic!("expected successful ack, got {other:?}"),
    };
    assert_eq!(request_id.as_deref(), Some("r1"));
    assert_eq!(acked.content.as_str(), "hi");

    for events in [&mut alice_client.events, &mut bob_client.events] {
        match next_event(events).await {
            ServerEvent::ReceiveMessage { message, status } => {
                assert_eq!(message.id, acked.id);
                assert_eq!(status, DeliveryStatus::Sent);
            }
            other => panic!("expected receiveMessage, got {other:?}"),
        }
        assert_eq!(
            next_event(events).await,
            ServerEvent::MessageStatus {
                message_id: acked.id,
                status: DeliveryStatus::Delivered,
            }
        );
    }

    let stored = harness.storage.messages_in(conversation_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].delivery_status, DeliveryStatus::Delivered);

    drop(alice_client.commands);
    drop(bob_client.commands);
    alice_client.task.await.unwrap();
    bob_client.task.await.unwrap();
}

#[tokio::test]
async fn non_participant_send_never_persists() {
    let harness = ChatHarness::new();
    let member = UserId::generate();
    let outsider = UserId::generate();
    let conversation_id = harness.conversation_with(&[member]);
    let mut subscription = harness.broadcaster.subscribe();

    let err = harness
        .coordinator
        .send(outsider, conversation_id, "let me in")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::NotParticipant)
    ));
    assert!(harness.storage.messages_in(conversation_id).is_empty());
    assert!(subscription.try_recv().is_err());
}

#[tokio::test]
async fn whitespace_only_content_is_rejected() {
    let harness = ChatHarness::new();
    let member = UserId::generate();
    let conversation_id = harness.conversation_with(&[member]);

    let err = harness
        .coordinator
        .send(member, conversation_id, " \n\t ")
        .await
        .unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::EmptyContent)));
    assert!(harness.storage.messages_in(conversation_id).is_empty());
}

#[tokio::test]
async fn cached_messages_follow_creation_order() {
    let harness = ChatHarness::new();
    let member = UserId::generate();
    let conversation_id = harness.conversation_with(&[member]);

    let mut sent = Vec::new();
    for text in ["one", "two", "three"] {
        let message = harness
            .coordinator
            .send(member, conversation_id, text)
            .await
            .unwrap();
        sent.push(message.id);

        let cached = harness
            .coordinator
            .get_cached_messages(conversation_id)
            .await
            .unwrap()
            .expect("cache populated by send");
        assert_eq!(cached.last().map(|m| m.id), Some(message.id));
    }

    let cached = harness
        .coordinator
        .get_messages(member, conversation_id)
        .await
        .unwrap();
    let ids: Vec<_> = cached.iter().map(|m| m.id).collect();
    assert_eq!(ids, sent);
    assert!(cached
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
    assert!(cached
        .iter()
        .all(|m| m.delivery_status == DeliveryStatus::Delivered));
}

#[tokio::test]
async fn mark_read_is_scoped_to_participants() {
    let harness = ChatHarness::new();
    let alice = UserId::generate();
    let bob = UserId::generate();
    let outsider = UserId::generate();
    let conversation_id = harness.conversation_with(&[alice, bob]);
    let message = harness
        .coordinator
        .send(alice, conversation_id, "read me")
        .await
        .unwrap();

    let marked = harness
        .coordinator
        .mark_read(outsider, &[message.id])
        .await
        .unwrap();
    assert!(marked.is_empty());
    assert_eq!(
        harness.storage.messages_in(conversation_id)[0].delivery_status,
        DeliveryStatus::Delivered
    );

    let mut subscription = harness.broadcaster.subscribe();
    let marked = harness
        .coordinator
        .mark_read(bob, &[message.id, MessageId::generate()])
        .await
        .unwrap();
    assert_eq!(marked, vec![message.id]);
    assert_eq!(
        harness.storage.messages_in(conversation_id)[0].delivery_status,
        DeliveryStatus::Read
    );

    let broadcast = subscription.try_recv().unwrap();
    assert_eq!(broadcast.rooms, vec![conversation_id]);
    assert_eq!(
        broadcast.event,
        ServerEvent::MessageStatus {
            message_id: message.id,
            status: DeliveryStatus::Read,
        }
    );
    assert!(subscription.try_recv().is_err());

    let cached = harness
        .coordinator
        .get_cached_messages(conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached[0].delivery_status, DeliveryStatus::Read);
}

#[tokio::test]
async fn cache_outage_does_not_fail_send() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .returning(|_| Err(StoreError::unavailable("redis down")));
    store
        .expect_set_ex()
        .returning(|_, _, _| Err(StoreError::unavailable("redis down")));
    let storage = Arc::new(InMemoryStorage::new());
    let harness = ChatHarness::with_backends(storage.clone(), storage.clone(), Arc::new(store));
    let member = UserId::generate();
    let conversation_id = harness.conversation_with(&[member]);

    let message = harness
        .coordinator
        .send(member, conversation_id, "still works")
        .await
        .unwrap();
    assert_eq!(message.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(storage.messages_in(conversation_id).len(), 1);

    // 读路径回源数据库
    let loaded = harness
        .coordinator
        .get_messages(member, conversation_id)
        .await
        .unwrap();
    assert_eq!(loaded.len(), 1);
}

#[tokio::test]
async fn persistence_failure_fails_send_without_broadcast() {
    let mut messages = MockMessages::new();
    messages
        .expect_save_message()
        .returning(|_| Err(RepositoryError::storage("disk full")));
    messages.expect_advance_status().never();
    let storage = Arc::new(InMemoryStorage::new());
    let harness = ChatHarness::with_backends(
        storage.clone(),
        Arc::new(messages),
        Arc::new(application::kv_store::memory::MemoryKeyValueStore::new()),
    );
    let member = UserId::generate();
    let conversation_id = harness.conversation_with(&[member]);
    let mut subscription = harness.broadcaster.subscribe();

    let err = harness
        .coordinator
        .send(member, conversation_id, "lost")
        .await
        .unwrap_err();
    assert!(err.is_internal());
    assert!(subscription.try_recv().is_err());
}

#[tokio::test]
async fn ack_reports_not_participant() {
    let harness = ChatHarness::new();
    let alice = UserId::generate();
    harness.conversation_with(&[alice]);
    let foreign = harness.conversation_with(&[UserId::generate()]);

    let mut client = connect(&harness, alice).await;
    client
        .commands
        .send(ClientCommand::SendMessage {
            content: "hello?".to_string(),
            conversation_id: foreign,
            request_id: None,
        })
        .await
        .unwrap();

    match next_event(&mut client.events).await {
        ServerEvent::Ack {
            success: false,
            error: Some(error),
            ..
        } => assert_eq!(error.code, "NOT_PARTICIPANT"),
        other => panic!("expected failed ack, got {other:?}"),
    }
    assert!(harness.storage.messages_in(foreign).is_empty());
}

#[tokio::test]
async fn disconnect_cancels_typing_and_goes_offline() {
    let harness = ChatHarness::new();
    let alice = UserId::generate();
    let bob = UserId::generate();
    let conversation_id = harness.conversation_with(&[alice, bob]);

    let mut bob_client = connect(&harness, bob).await;
    let alice_client = connect(&harness, alice).await;
    assert_eq!(
        next_event(&mut bob_client.events).await,
        ServerEvent::UserOnline { user_id: alice }
    );

    alice_client
        .commands
        .send(ClientCommand::Typing { conversation_id })
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut bob_client.events).await,
        ServerEvent::Typing {
            user_id: alice,
            conversation_id,
        }
    );

    drop(alice_client.commands);
    alice_client.task.await.unwrap();

    assert_eq!(
        next_event(&mut bob_client.events).await,
        ServerEvent::StopTyping {
            user_id: alice,
            conversation_id,
        }
    );
    assert_eq!(
        next_event(&mut bob_client.events).await,
        ServerEvent::UserOffline { user_id: alice }
    );
    assert_eq!(
        harness.presence.status(alice).await.unwrap(),
        Some(PresenceStatus::Offline)
    );

    // 防抖定时器已取消，不会再补发 stopTyping
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_silent(&mut bob_client.events).await;
}

#[tokio::test]
async fn typing_for_unjoined_room_is_ignored() {
    let harness = ChatHarness::new();
    let alice = UserId::generate();
    let bob = UserId::generate();
    harness.conversation_with(&[alice, bob]);
    let elsewhere = harness.conversation_with(&[bob]);

    let mut bob_client = connect(&harness, bob).await;
    let alice_client = connect(&harness, alice).await;
    next_event(&mut bob_client.events).await;

    alice_client
        .commands
        .send(ClientCommand::Typing {
            conversation_id: elsewhere,
        })
        .await
        .unwrap();
    assert_silent(&mut bob_client.events).await;
}
