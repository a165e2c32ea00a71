//! Deadline enforcement keeps going when one chat cannot be ended.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use scribe_market_core::domain::{
    Assignment, AssignmentListing, ChatMessage, ChatSession, Notification, NotificationInbox,
    Participant, Request, UserRecord, WriterProfile, WriterTerms,
};
use scribe_market_core::ports::{
    ChangeStream, Delivery, Handover, MarketStore, PortError, PortResult, Rejection,
    RequestDraft, SessionClosure, Topic,
};
use scribe_market_core::services::{BecomeWriter, NewAssignment, ProfileUpdate};
use scribe_market_core::{ChatPhase, Clock, InMemoryStore, MarketPolicy, Marketplace, Principal};

struct FixedClock(Mutex<DateTime<Utc>>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Delegates to the in-memory store but refuses to force-end one chat.
struct StuckChatStore {
    inner: InMemoryStore,
    stuck: Mutex<Option<String>>,
}

#[async_trait]
impl MarketStore for StuckChatStore {
    async fn create_user(&self, user: &UserRecord) -> PortResult<()> {
        self.inner.create_user(user).await
    }
    async fn get_user(&self, user_id: Uuid) -> PortResult<UserRecord> {
        self.inner.get_user(user_id).await
    }
    async fn find_user_by_username(&self, username: &str) -> PortResult<UserRecord> {
        self.inner.find_user_by_username(username).await
    }
    async fn save_writer_terms(
        &self,
        user_id: Uuid,
        terms: &WriterTerms,
    ) -> PortResult<UserRecord> {
        self.inner.save_writer_terms(user_id, terms).await
    }
    async fn list_available_writers(&self) -> PortResult<Vec<UserRecord>> {
        self.inner.list_available_writers().await
    }
    async fn insert_assignment(&self, assignment: &Assignment, max_active: usize) -> PortResult<()> {
        self.inner.insert_assignment(assignment, max_active).await
    }
    async fn get_assignment(&self, assignment_id: Uuid) -> PortResult<Assignment> {
        self.inner.get_assignment(assignment_id).await
    }
    async fn list_open_assignments(&self) -> PortResult<Vec<AssignmentListing>> {
        self.inner.list_open_assignments().await
    }
    async fn list_assignments_by_owner(&self, owner_id: Uuid) -> PortResult<Vec<Assignment>> {
        self.inner.list_assignments_by_owner(owner_id).await
    }
    async fn delete_open_assignment(&self, assignment_id: Uuid, owner_id: Uuid) -> PortResult<()> {
        self.inner.delete_open_assignment(assignment_id, owner_id).await
    }
    async fn hand_over(&self, handover: &Handover) -> PortResult<ChatSession> {
        self.inner.hand_over(handover).await
    }
    async fn open_request(&self, draft: &RequestDraft) -> PortResult<()> {
        self.inner.open_request(draft).await
    }
    async fn get_request(&self, request_id: Uuid) -> PortResult<Request> {
        self.inner.get_request(request_id).await
    }
    async fn reject_request(&self, rejection: &Rejection) -> PortResult<()> {
        self.inner.reject_request(rejection).await
    }
    async fn purge_expired_requests(&self, now: DateTime<Utc>) -> PortResult<Vec<Request>> {
        self.inner.purge_expired_requests(now).await
    }
    async fn push_notification(&self, delivery: &Delivery) -> PortResult<()> {
        self.inner.push_notification(delivery).await
    }
    async fn get_inbox(&self, user_id: Uuid) -> PortResult<NotificationInbox> {
        self.inner.get_inbox(user_id).await
    }
    async fn remove_notification(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> PortResult<Notification> {
        self.inner.remove_notification(user_id, notification_id).await
    }
    async fn get_chat(&self, chat_id: &str) -> PortResult<ChatSession> {
        self.inner.get_chat(chat_id).await
    }
    async fn find_chat_by_assignment(&self, assignment_id: Uuid) -> PortResult<ChatSession> {
        self.inner.find_chat_by_assignment(assignment_id).await
    }
    async fn list_chats_for(&self, user_id: Uuid) -> PortResult<Vec<ChatSession>> {
        self.inner.list_chats_for(user_id).await
    }
    async fn append_message(&self, chat_id: &str, message: &ChatMessage) -> PortResult<ChatSession> {
        self.inner.append_message(chat_id, message).await
    }
    async fn set_typing(&self, chat_id: &str, holder: Option<Uuid>) -> PortResult<ChatSession> {
        self.inner.set_typing(chat_id, holder).await
    }
    async fn toggle_end_chat(&self, chat_id: &str, who: Participant) -> PortResult<ChatSession> {
        self.inner.toggle_end_chat(chat_id, who).await
    }
    async fn force_end_chat(&self, chat_id: &str) -> PortResult<ChatSession> {
        if self.stuck.lock().unwrap().as_deref() == Some(chat_id) {
            return Err(PortError::NotFound(format!("Chat {} not found", chat_id)));
        }
        self.inner.force_end_chat(chat_id).await
    }
    async fn mark_chat_read(&self, chat_id: &str, reader: Uuid) -> PortResult<ChatSession> {
        self.inner.mark_chat_read(chat_id, reader).await
    }
    async fn list_overdue_chats(&self, now: DateTime<Utc>) -> PortResult<Vec<ChatSession>> {
        self.inner.list_overdue_chats(now).await
    }
    async fn close_session(&self, closure: &SessionClosure) -> PortResult<WriterProfile> {
        self.inner.close_session(closure).await
    }
    async fn subscribe(&self, topic: Topic) -> PortResult<ChangeStream> {
        self.inner.subscribe(topic).await
    }
}

fn principal(name: &str) -> Principal {
    Principal {
        id: Uuid::new_v4(),
        display_name: name.to_string(),
        email: format!("{}@example.edu", name),
        avatar_url: None,
    }
}

#[tokio::test]
async fn one_failing_chat_does_not_stop_the_sweep() {
    let clock = Arc::new(FixedClock(Mutex::new(Utc::now())));
    let store = Arc::new(StuckChatStore {
        inner: InMemoryStore::new(),
        stuck: Mutex::new(None),
    });
    let market = Marketplace::new(store.clone(), clock.clone(), MarketPolicy::default());

    let owner = principal("owner");
    let writer = principal("writer");
    market.users.onboard(&owner, "owner").await.unwrap();
    market.users.onboard(&writer, "writer").await.unwrap();
    market
        .writers
        .become_writer(
            &writer,
            BecomeWriter {
                bio: "Essays".to_string(),
                price_per_page: 100,
                min_pages: 1,
                max_pages: 20,
            },
        )
        .await
        .unwrap();
    market
        .writers
        .update_profile(
            &writer,
            ProfileUpdate {
                is_available: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut chats = Vec::new();
    for title in ["First essay", "Second essay"] {
        let posted = market
            .assignments
            .post_assignment(
                &owner,
                NewAssignment {
                    title: title.to_string(),
                    description: String::new(),
                    pages: 2,
                    rate_per_page: 100,
                    deadline: clock.now() + Duration::hours(12),
                },
            )
            .await
            .unwrap();
        chats.push(
            market
                .assignments
                .claim_assignment(&writer, posted.id)
                .await
                .unwrap(),
        );
    }
    *store.stuck.lock().unwrap() = Some(chats[0].id.clone());

    {
        let mut now = clock.0.lock().unwrap();
        *now = *now + Duration::days(1);
    }
    let ended = market.chats.enforce_deadlines().await.unwrap();
    assert_eq!(ended, vec![chats[1].id.clone()]);

    let stuck = market.chats.session(&owner, &chats[0].id).await.unwrap();
    assert_eq!(stuck.phase(), ChatPhase::Active);
    let done = market.chats.session(&owner, &chats[1].id).await.unwrap();
    assert_eq!(done.phase(), ChatPhase::AwaitingFeedback);
}
