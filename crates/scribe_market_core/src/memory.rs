//! crates/scribe_market_core/src/memory.rs
//!
//! An in-memory `MarketStore`. Every operation runs under a single lock, so
//! each write set is applied atomically. Used by the test-suite and by the
//! server's `memory` backend for local development.
//!
//! Data only lives as long as the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Assignment, AssignmentListing, ChatMessage, ChatPhase, ChatSession, Notification,
    NotificationInbox, Participant, Request, RequestKind, RequestStatus, UserRecord, WriterProfile,
    WriterTerms,
};
use crate::feed::ChangeHub;
use crate::ports::{
    Change, ChangeStream, Delivery, Handover, MarketStore, PortError, PortResult, Rejection,
    RequestDraft, SessionClosure, Topic,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    assignments: HashMap<Uuid, Assignment>,
    requests: HashMap<Uuid, Request>,
    inboxes: HashMap<Uuid, NotificationInbox>,
    chats: HashMap<String, ChatSession>,
}

impl Tables {
    fn active_assignments(&self, owner_id: Uuid) -> usize {
        self.assignments
            .values()
            .filter(|a| a.owner_id == owner_id && a.is_active())
            .count()
    }

    fn pending_requests_by(&self, requester_id: Uuid) -> usize {
        self.requests
            .values()
            .filter(|r| r.requester_id == requester_id && r.status == RequestStatus::Pending)
            .count()
    }

    fn has_pending(&self, requester_id: Uuid, assignment_id: Uuid) -> bool {
        self.requests.values().any(|r| {
            r.requester_id == requester_id
                && r.assignment_id == assignment_id
                && r.status == RequestStatus::Pending
        })
    }

    /// A task proposed to one writer stays off the public board while the proposal is pending.
    fn has_pending_proposal(&self, assignment_id: Uuid) -> bool {
        self.requests.values().any(|r| {
            r.assignment_id == assignment_id
                && r.kind == RequestKind::UserToWriter
                && r.status == RequestStatus::Pending
        })
    }

    fn deliver(&mut self, delivery: &Delivery) {
        self.inboxes
            .entry(delivery.recipient)
            .or_insert_with(|| NotificationInbox::empty(delivery.recipient))
            .notifications
            .push(delivery.notification.clone());
    }

    /// Drops every notification referencing one of the requests; returns the touched inboxes.
    fn drop_request_notices(&mut self, request_ids: &[Uuid]) -> Vec<Uuid> {
        let mut touched = Vec::new();
        for inbox in self.inboxes.values_mut() {
            let before = inbox.notifications.len();
            inbox
                .notifications
                .retain(|n| n.request_id.map(|id| !request_ids.contains(&id)).unwrap_or(true));
            if inbox.notifications.len() != before {
                touched.push(inbox.user_id);
            }
        }
        touched
    }

    /// Removes every request on the assignment along with its notifications.
    fn drop_assignment_requests(&mut self, assignment_id: Uuid) -> Vec<Uuid> {
        let dropped: Vec<Uuid> = self
            .requests
            .values()
            .filter(|r| r.assignment_id == assignment_id)
            .map(|r| r.id)
            .collect();
        for id in &dropped {
            self.requests.remove(id);
        }
        self.drop_request_notices(&dropped)
    }

    fn inbox(&self, user_id: Uuid) -> NotificationInbox {
        self.inboxes
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| NotificationInbox::empty(user_id))
    }

    fn open_listings(&self) -> Vec<AssignmentListing> {
        let mut open: Vec<AssignmentListing> = self
            .assignments
            .values()
            .filter(|a| !a.is_assigned && !self.has_pending_proposal(a.id))
            .map(|a| AssignmentListing {
                assignment: a.clone(),
                total_price: a.total_price(),
                pending_requests: self
                    .requests
                    .values()
                    .filter(|r| r.assignment_id == a.id && r.status == RequestStatus::Pending)
                    .count(),
            })
            .collect();
        open.sort_by_key(|l| l.assignment.created_at);
        open
    }

    fn chat_mut(&mut self, chat_id: &str) -> PortResult<&mut ChatSession> {
        self.chats
            .get_mut(chat_id)
            .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))
    }
}

/// A `MarketStore` holding every collection in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    hub: ChangeHub,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a fresh snapshot for each topic that has live subscribers.
    fn publish(&self, tables: &Tables, topics: impl IntoIterator<Item = Topic>) {
        for topic in topics {
            if !self.hub.has_subscribers(&topic) {
                continue;
            }
            let change = match &topic {
                Topic::Inbox(user_id) => Change::Inbox(tables.inbox(*user_id)),
                Topic::Chat(chat_id) => match tables.chats.get(chat_id) {
                    Some(chat) => Change::Chat(chat.clone()),
                    None => Change::ChatClosed(chat_id.clone()),
                },
                Topic::OpenAssignments => Change::OpenAssignments(tables.open_listings()),
            };
            self.hub.publish(&topic, change);
        }
    }
}

fn inbox_topics<'a>(deliveries: impl IntoIterator<Item = &'a Delivery>) -> Vec<Topic> {
    deliveries
        .into_iter()
        .map(|d| Topic::Inbox(d.recipient))
        .collect()
}

#[async_trait]
impl MarketStore for InMemoryStore {
    async fn create_user(&self, user: &UserRecord) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&user.id) {
            return Err(PortError::Conflict(format!(
                "User {} is already onboarded",
                user.id
            )));
        }
        if tables
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username))
        {
            return Err(PortError::Conflict(format!(
                "Username '{}' is already taken",
                user.username
            )));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<UserRecord> {
        let tables = self.tables.lock().await;
        tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn find_user_by_username(&self, username: &str) -> PortResult<UserRecord> {
        let tables = self.tables.lock().await;
        tables
            .users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User '{}' not found", username)))
    }

    async fn save_writer_terms(
        &self,
        user_id: Uuid,
        terms: &WriterTerms,
    ) -> PortResult<UserRecord> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        match user.writer_profile.as_mut() {
            Some(profile) => terms.apply_to(profile),
            None => user.writer_profile = Some(terms.clone().into_profile()),
        }
        user.is_writer = true;
        Ok(user.clone())
    }

    async fn list_available_writers(&self) -> PortResult<Vec<UserRecord>> {
        let tables = self.tables.lock().await;
        let mut writers: Vec<UserRecord> = tables
            .users
            .values()
            .filter(|u| u.is_available_writer())
            .cloned()
            .collect();
        writers.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(writers)
    }

    async fn insert_assignment(&self, assignment: &Assignment, max_active: usize) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.active_assignments(assignment.owner_id) >= max_active {
            return Err(PortError::LimitReached(format!(
                "An owner may have at most {} active assignments",
                max_active
            )));
        }
        tables.assignments.insert(assignment.id, assignment.clone());
        self.publish(&tables, [Topic::OpenAssignments]);
        Ok(())
    }

    async fn get_assignment(&self, assignment_id: Uuid) -> PortResult<Assignment> {
        let tables = self.tables.lock().await;
        tables
            .assignments
            .get(&assignment_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Assignment {} not found", assignment_id)))
    }

    async fn list_open_assignments(&self) -> PortResult<Vec<AssignmentListing>> {
        let tables = self.tables.lock().await;
        Ok(tables.open_listings())
    }

    async fn list_assignments_by_owner(&self, owner_id: Uuid) -> PortResult<Vec<Assignment>> {
        let tables = self.tables.lock().await;
        let mut owned: Vec<Assignment> = tables
            .assignments
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|a| a.created_at);
        Ok(owned)
    }

    async fn delete_open_assignment(&self, assignment_id: Uuid, owner_id: Uuid) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let assignment = tables
            .assignments
            .get(&assignment_id)
            .ok_or_else(|| PortError::NotFound(format!("Assignment {} not found", assignment_id)))?;
        if assignment.owner_id != owner_id {
            return Err(PortError::Unauthorized);
        }
        if assignment.is_assigned {
            return Err(PortError::Conflict(format!(
                "Assignment {} has already been assigned",
                assignment_id
            )));
        }
        tables.assignments.remove(&assignment_id);
        let touched = tables.drop_assignment_requests(assignment_id);
        let mut topics: Vec<Topic> = touched.into_iter().map(Topic::Inbox).collect();
        topics.push(Topic::OpenAssignments);
        self.publish(&tables, topics);
        Ok(())
    }

    async fn hand_over(&self, handover: &Handover) -> PortResult<ChatSession> {
        let mut tables = self.tables.lock().await;

        // All checks run before the first mutation so a refusal writes nothing.
        let assignment = tables
            .assignments
            .get(&handover.assignment_id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Assignment {} not found", handover.assignment_id))
            })?;
        if assignment.is_assigned || assignment.is_finished {
            return Err(PortError::Conflict(format!(
                "Assignment {} has already been assigned",
                handover.assignment_id
            )));
        }
        if let Some(accepted) = &handover.accepted_request {
            let request = tables.requests.get(&accepted.request_id).ok_or_else(|| {
                PortError::NotFound(format!("Request {} not found", accepted.request_id))
            })?;
            if request.status != RequestStatus::Pending {
                return Err(PortError::Conflict(format!(
                    "Request {} is no longer pending",
                    accepted.request_id
                )));
            }
        }
        if tables.chats.contains_key(&handover.chat.id) {
            return Err(PortError::Conflict(format!(
                "Chat {} already exists",
                handover.chat.id
            )));
        }

        if let Some(assignment) = tables.assignments.get_mut(&handover.assignment_id) {
            assignment.assign_to(handover.writer_id);
        }
        let mut topics = inbox_topics(&handover.notices);
        if let Some(accepted) = &handover.accepted_request {
            if let Some(request) = tables.requests.get_mut(&accepted.request_id) {
                request.status = RequestStatus::Accepted;
            }
            if let Some(inbox) = tables.inboxes.get_mut(&accepted.recipient) {
                inbox
                    .notifications
                    .retain(|n| n.request_id != Some(accepted.request_id));
            }
            topics.push(Topic::Inbox(accepted.recipient));
        }
        if let Some(profile) = tables
            .users
            .get_mut(&handover.writer_id)
            .and_then(|u| u.writer_profile.as_mut())
        {
            profile.tasks_chosen += 1;
        }
        tables
            .chats
            .insert(handover.chat.id.clone(), handover.chat.clone());
        for notice in &handover.notices {
            tables.deliver(notice);
        }

        topics.push(Topic::OpenAssignments);
        topics.push(Topic::Chat(handover.chat.id.clone()));
        self.publish(&tables, topics);
        Ok(handover.chat.clone())
    }

    async fn open_request(&self, draft: &RequestDraft) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let request = &draft.request;

        match &draft.new_assignment {
            Some(assignment) => {
                if let Some(max_active) = draft.max_active {
                    if tables.active_assignments(assignment.owner_id) >= max_active {
                        return Err(PortError::LimitReached(format!(
                            "An owner may have at most {} active assignments",
                            max_active
                        )));
                    }
                }
            }
            None => {
                let assignment = tables.assignments.get(&request.assignment_id).ok_or_else(|| {
                    PortError::NotFound(format!("Assignment {} not found", request.assignment_id))
                })?;
                if assignment.is_assigned {
                    return Err(PortError::Conflict(format!(
                        "Assignment {} has already been assigned",
                        request.assignment_id
                    )));
                }
            }
        }
        if tables.has_pending(request.requester_id, request.assignment_id) {
            return Err(PortError::Conflict(
                "A pending request for this assignment already exists".to_string(),
            ));
        }
        if let Some(max_pending) = draft.max_pending {
            if tables.pending_requests_by(request.requester_id) >= max_pending {
                return Err(PortError::LimitReached(format!(
                    "At most {} pending requests are allowed at a time",
                    max_pending
                )));
            }
        }

        if let Some(assignment) = &draft.new_assignment {
            tables.assignments.insert(assignment.id, assignment.clone());
        }
        tables.requests.insert(request.id, request.clone());
        tables.deliver(&draft.notice);
        self.publish(
            &tables,
            [Topic::Inbox(draft.notice.recipient), Topic::OpenAssignments],
        );
        Ok(())
    }

    async fn get_request(&self, request_id: Uuid) -> PortResult<Request> {
        let tables = self.tables.lock().await;
        tables
            .requests
            .get(&request_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Request {} not found", request_id)))
    }

    async fn reject_request(&self, rejection: &Rejection) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let request = tables
            .requests
            .get_mut(&rejection.request_id)
            .ok_or_else(|| PortError::NotFound(format!("Request {} not found", rejection.request_id)))?;
        if request.status != RequestStatus::Pending {
            return Err(PortError::Conflict(format!(
                "Request {} is no longer pending",
                rejection.request_id
            )));
        }
        request.status = RequestStatus::Rejected;
        if let Some(inbox) = tables.inboxes.get_mut(&rejection.recipient) {
            inbox
                .notifications
                .retain(|n| n.request_id != Some(rejection.request_id));
        }
        for notice in &rejection.notices {
            tables.deliver(notice);
        }
        let mut topics = inbox_topics(&rejection.notices);
        topics.push(Topic::Inbox(rejection.recipient));
        topics.push(Topic::OpenAssignments);
        self.publish(&tables, topics);
        Ok(())
    }

    async fn purge_expired_requests(&self, now: DateTime<Utc>) -> PortResult<Vec<Request>> {
        let mut tables = self.tables.lock().await;
        let expired: Vec<Request> = tables
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.is_expired(now))
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(expired);
        }
        let ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
        for id in &ids {
            tables.requests.remove(id);
        }
        let touched = tables.drop_request_notices(&ids);
        let mut topics: Vec<Topic> = touched.into_iter().map(Topic::Inbox).collect();
        topics.push(Topic::OpenAssignments);
        self.publish(&tables, topics);
        Ok(expired)
    }

    async fn push_notification(&self, delivery: &Delivery) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        tables.deliver(delivery);
        self.publish(&tables, [Topic::Inbox(delivery.recipient)]);
        Ok(())
    }

    async fn get_inbox(&self, user_id: Uuid) -> PortResult<NotificationInbox> {
        let tables = self.tables.lock().await;
        Ok(tables.inbox(user_id))
    }

    async fn remove_notification(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> PortResult<Notification> {
        let mut tables = self.tables.lock().await;
        let not_found = || PortError::NotFound(format!("Notification {} not found", notification_id));
        let inbox = tables.inboxes.get_mut(&user_id).ok_or_else(not_found)?;
        let position = inbox
            .notifications
            .iter()
            .position(|n| n.id == notification_id)
            .ok_or_else(not_found)?;
        let removed = inbox.notifications.remove(position);
        self.publish(&tables, [Topic::Inbox(user_id)]);
        Ok(removed)
    }

    async fn get_chat(&self, chat_id: &str) -> PortResult<ChatSession> {
        let tables = self.tables.lock().await;
        tables
            .chats
            .get(chat_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))
    }

    async fn find_chat_by_assignment(&self, assignment_id: Uuid) -> PortResult<ChatSession> {
        let tables = self.tables.lock().await;
        tables
            .chats
            .values()
            .find(|c| c.assignment_id == assignment_id)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("No chat for assignment {}", assignment_id))
            })
    }

    async fn list_chats_for(&self, user_id: Uuid) -> PortResult<Vec<ChatSession>> {
        let tables = self.tables.lock().await;
        let mut chats: Vec<ChatSession> = tables
            .chats
            .values()
            .filter(|c| c.participant(user_id).is_some())
            .cloned()
            .collect();
        chats.sort_by_key(|c| c.created_at);
        Ok(chats)
    }

    async fn append_message(&self, chat_id: &str, message: &ChatMessage) -> PortResult<ChatSession> {
        let mut tables = self.tables.lock().await;
        let chat = tables.chat_mut(chat_id)?;
        chat.messages.push(message.clone());
        if chat.typing == Some(message.sender_id) {
            chat.typing = None;
        }
        let snapshot = chat.clone();
        self.publish(&tables, [Topic::Chat(chat_id.to_string())]);
        Ok(snapshot)
    }

    async fn set_typing(&self, chat_id: &str, holder: Option<Uuid>) -> PortResult<ChatSession> {
        let mut tables = self.tables.lock().await;
        let chat = tables.chat_mut(chat_id)?;
        chat.typing = holder;
        let snapshot = chat.clone();
        self.publish(&tables, [Topic::Chat(chat_id.to_string())]);
        Ok(snapshot)
    }

    async fn toggle_end_chat(&self, chat_id: &str, who: Participant) -> PortResult<ChatSession> {
        let mut tables = self.tables.lock().await;
        let chat = tables.chat_mut(chat_id)?;
        if !chat.toggle_end(who) {
            return Err(PortError::Conflict(format!(
                "Chat {} is already awaiting feedback",
                chat_id
            )));
        }
        let snapshot = chat.clone();
        self.publish(&tables, [Topic::Chat(chat_id.to_string())]);
        Ok(snapshot)
    }

    async fn force_end_chat(&self, chat_id: &str) -> PortResult<ChatSession> {
        let mut tables = self.tables.lock().await;
        let chat = tables.chat_mut(chat_id)?;
        chat.owner_ended = true;
        chat.writer_ended = true;
        let snapshot = chat.clone();
        self.publish(&tables, [Topic::Chat(chat_id.to_string())]);
        Ok(snapshot)
    }

    async fn mark_chat_read(&self, chat_id: &str, reader: Uuid) -> PortResult<ChatSession> {
        let mut tables = self.tables.lock().await;
        let chat = tables.chat_mut(chat_id)?;
        let changed = chat.mark_read_by(reader);
        let snapshot = chat.clone();
        if changed > 0 {
            self.publish(&tables, [Topic::Chat(chat_id.to_string())]);
        }
        Ok(snapshot)
    }

    async fn list_overdue_chats(&self, now: DateTime<Utc>) -> PortResult<Vec<ChatSession>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .chats
            .values()
            .filter(|c| c.phase() == ChatPhase::Active)
            .filter(|c| {
                tables
                    .assignments
                    .get(&c.assignment_id)
                    .map(|a| a.deadline <= now)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn close_session(&self, closure: &SessionClosure) -> PortResult<WriterProfile> {
        let mut tables = self.tables.lock().await;

        let chat = tables
            .chats
            .get(&closure.chat_id)
            .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", closure.chat_id)))?;
        if chat.phase() != ChatPhase::AwaitingFeedback {
            return Err(PortError::Conflict(format!(
                "Chat {} has not been ended by both participants",
                closure.chat_id
            )));
        }
        let mut assignment = tables
            .assignments
            .get(&closure.assignment_id)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("Assignment {} not found", closure.assignment_id))
            })?;
        if !assignment.finish(closure.review.rating) {
            return Err(PortError::Conflict(format!(
                "Assignment {} cannot be finished",
                closure.assignment_id
            )));
        }
        let mut profile = tables
            .users
            .get(&closure.writer_id)
            .and_then(|u| u.writer_profile.clone())
            .ok_or_else(|| {
                PortError::NotFound(format!("Writer profile {} not found", closure.writer_id))
            })?;

        profile.record_review(closure.review.clone());
        if let Some(user) = tables.users.get_mut(&closure.writer_id) {
            user.writer_profile = Some(profile.clone());
        }
        // The finished assignment is archived by deletion together with its chat and requests.
        tables.chats.remove(&closure.chat_id);
        tables.assignments.remove(&assignment.id);
        let touched = tables.drop_assignment_requests(assignment.id);
        for notice in &closure.notices {
            tables.deliver(notice);
        }

        let mut topics = inbox_topics(&closure.notices);
        topics.extend(touched.into_iter().map(Topic::Inbox));
        topics.push(Topic::Chat(closure.chat_id.clone()));
        self.publish(&tables, topics);
        Ok(profile)
    }

    async fn subscribe(&self, topic: Topic) -> PortResult<ChangeStream> {
        Ok(self.hub.subscribe(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssignmentStatus, Principal};
    use chrono::Duration;
    use tokio_stream::StreamExt;

    fn assignment(owner_id: Uuid) -> Assignment {
        let now = Utc::now();
        Assignment {
            id: Uuid::new_v4(),
            owner_id,
            writer_id: None,
            title: "Lab report".to_string(),
            description: "Chemistry".to_string(),
            pages: 3,
            rate_per_page: 50,
            deadline: now + Duration::days(2),
            status: AssignmentStatus::Pending,
            is_assigned: false,
            is_finished: false,
            rating: None,
            created_at: now,
        }
    }

    fn handover(a: &Assignment, writer_id: Uuid) -> Handover {
        Handover {
            assignment_id: a.id,
            writer_id,
            chat: ChatSession::open(a, writer_id, Utc::now()),
            accepted_request: None,
            notices: Vec::new(),
        }
    }

    #[tokio::test]
    async fn second_handover_is_a_conflict() {
        let store = InMemoryStore::new();
        let a = assignment(Uuid::new_v4());
        store.insert_assignment(&a, 5).await.unwrap();

        store.hand_over(&handover(&a, Uuid::new_v4())).await.unwrap();
        let err = store.hand_over(&handover(&a, Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
        assert_eq!(store.list_chats_for(a.owner_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn usernames_are_unique_ignoring_case() {
        let store = InMemoryStore::new();
        let principal = |name: &str| Principal {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            email: format!("{}@example.com", name),
            avatar_url: None,
        };
        let first = UserRecord::onboard(&principal("ada"), "Ada".to_string(), Utc::now());
        store.create_user(&first).await.unwrap();
        let second = UserRecord::onboard(&principal("ada2"), "ada".to_string(), Utc::now());
        let err = store.create_user(&second).await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn inbox_subscribers_see_pushed_notifications() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        let mut stream = store.subscribe(Topic::Inbox(user)).await.unwrap();

        store
            .push_notification(&Delivery {
                recipient: user,
                notification: Notification::new("hello".to_string(), Utc::now()),
            })
            .await
            .unwrap();

        let change = tokio::time::timeout(std::time::Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        match change {
            Change::Inbox(inbox) => {
                assert_eq!(inbox.notifications.len(), 1);
                assert_eq!(inbox.notifications[0].message, "hello");
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }
}
