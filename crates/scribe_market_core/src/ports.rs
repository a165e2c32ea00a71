//! crates/scribe_market_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the marketplace core.
//! These traits form the boundary of the hexagonal architecture: the workflow
//! services only ever talk to the store, the identity provider and the clock
//! through them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{
    Assignment, AssignmentListing, AuthSession, ChatMessage, ChatSession, Notification,
    NotificationInbox, Participant, Principal, PrincipalChange, Request, Review, UserRecord,
    WriterProfile, WriterTerms,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A conditional write found the document in a state other than expected.
    #[error("Conflicting write: {0}")]
    Conflict(String),
    /// A per-user quota checked inside the write was exhausted.
    #[error("Limit reached: {0}")]
    LimitReached(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Live Subscriptions
//=========================================================================================

/// What a live subscription is watching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Inbox(Uuid),
    Chat(String),
    OpenAssignments,
}

/// A fresh snapshot pushed to subscribers of a topic.
#[derive(Debug, Clone)]
pub enum Change {
    Inbox(NotificationInbox),
    Chat(ChatSession),
    ChatClosed(String),
    OpenAssignments(Vec<AssignmentListing>),
}

/// Stream of changes; dropping it cancels the subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Change> + Send>>;

/// Stream of sign-in / sign-out events.
pub type PrincipalStream = Pin<Box<dyn Stream<Item = PrincipalChange> + Send>>;

//=========================================================================================
// Multi-document Write Sets
//=========================================================================================
// Each of these is applied by the store as one atomic unit: either every
// document in the set changes or none does.
//=========================================================================================

/// A notification addressed to one recipient's inbox.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub recipient: Uuid,
    pub notification: Notification,
}

/// Opening a request, optionally together with the assignment it proposes.
#[derive(Debug, Clone)]
pub struct RequestDraft {
    pub request: Request,
    pub new_assignment: Option<Assignment>,
    pub notice: Delivery,
    /// Refuse with `LimitReached` when the requester already has this many pending requests.
    pub max_pending: Option<usize>,
    /// Refuse with `LimitReached` when the owner already has this many unfinished assignments.
    pub max_active: Option<usize>,
}

/// Moving an unassigned assignment to a writer and opening its chat.
#[derive(Debug, Clone)]
pub struct Handover {
    pub assignment_id: Uuid,
    pub writer_id: Uuid,
    pub chat: ChatSession,
    /// Set when the handover accepts a request: it must still be pending and
    /// the recipient's notification for it is consumed.
    pub accepted_request: Option<AcceptedRequest>,
    pub notices: Vec<Delivery>,
}

#[derive(Debug, Clone)]
pub struct AcceptedRequest {
    pub request_id: Uuid,
    pub recipient: Uuid,
}

/// Rejecting a pending request and consuming its notification.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub request_id: Uuid,
    pub recipient: Uuid,
    pub notices: Vec<Delivery>,
}

/// Closing a chat: finish the assignment, fold the review, delete chat and assignment.
#[derive(Debug, Clone)]
pub struct SessionClosure {
    pub chat_id: String,
    pub assignment_id: Uuid,
    pub writer_id: Uuid,
    pub review: Review,
    pub notices: Vec<Delivery>,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The persistence gateway: the only component that touches the backing store.
#[async_trait]
pub trait MarketStore: Send + Sync {
    // --- Users and Writer Profiles ---
    /// Fails with `Conflict` when the id or the username is already taken.
    async fn create_user(&self, user: &UserRecord) -> PortResult<()>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<UserRecord>;

    async fn find_user_by_username(&self, username: &str) -> PortResult<UserRecord>;

    /// Creates or updates the writer terms and marks the user a writer.
    /// Rating, counters and reviews of an existing profile are preserved.
    async fn save_writer_terms(&self, user_id: Uuid, terms: &WriterTerms)
        -> PortResult<UserRecord>;

    async fn list_available_writers(&self) -> PortResult<Vec<UserRecord>>;

    // --- Assignments ---
    async fn insert_assignment(&self, assignment: &Assignment, max_active: usize)
        -> PortResult<()>;

    async fn get_assignment(&self, assignment_id: Uuid) -> PortResult<Assignment>;

    async fn list_open_assignments(&self) -> PortResult<Vec<AssignmentListing>>;

    async fn list_assignments_by_owner(&self, owner_id: Uuid) -> PortResult<Vec<Assignment>>;

    /// Deletes the assignment only if it is still unassigned and owned by `owner_id`.
    async fn delete_open_assignment(&self, assignment_id: Uuid, owner_id: Uuid)
        -> PortResult<()>;

    /// Conditional on `is_assigned = false`; fails with `Conflict` otherwise.
    async fn hand_over(&self, handover: &Handover) -> PortResult<ChatSession>;

    // --- Requests and Notifications ---
    /// Fails with `Conflict` when the requester already has a pending request on the assignment.
    async fn open_request(&self, draft: &RequestDraft) -> PortResult<()>;

    async fn get_request(&self, request_id: Uuid) -> PortResult<Request>;

    async fn reject_request(&self, rejection: &Rejection) -> PortResult<()>;

    /// Removes pending requests past their expiry along with their notifications.
    async fn purge_expired_requests(&self, now: DateTime<Utc>) -> PortResult<Vec<Request>>;

    async fn push_notification(&self, delivery: &Delivery) -> PortResult<()>;

    /// Returns an empty inbox for users who never received anything.
    async fn get_inbox(&self, user_id: Uuid) -> PortResult<NotificationInbox>;

    async fn remove_notification(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> PortResult<Notification>;

    // --- Chat Sessions ---
    async fn get_chat(&self, chat_id: &str) -> PortResult<ChatSession>;

    async fn find_chat_by_assignment(&self, assignment_id: Uuid) -> PortResult<ChatSession>;

    async fn list_chats_for(&self, user_id: Uuid) -> PortResult<Vec<ChatSession>>;

    async fn append_message(&self, chat_id: &str, message: &ChatMessage)
        -> PortResult<ChatSession>;

    async fn set_typing(&self, chat_id: &str, holder: Option<Uuid>) -> PortResult<ChatSession>;

    /// Flips one end-chat flag; `Conflict` once both are already set.
    async fn toggle_end_chat(&self, chat_id: &str, who: Participant) -> PortResult<ChatSession>;

    /// Sets both end-chat flags, moving the session to feedback.
    async fn force_end_chat(&self, chat_id: &str) -> PortResult<ChatSession>;

    async fn mark_chat_read(&self, chat_id: &str, reader: Uuid) -> PortResult<ChatSession>;

    /// Chats still active whose assignment deadline is at or before `now`.
    async fn list_overdue_chats(&self, now: DateTime<Utc>) -> PortResult<Vec<ChatSession>>;

    /// Requires both end-chat flags set; returns the writer's updated profile.
    async fn close_session(&self, closure: &SessionClosure) -> PortResult<WriterProfile>;

    // --- Live Subscriptions ---
    async fn subscribe(&self, topic: Topic) -> PortResult<ChangeStream>;
}

/// The managed identity behind sign-in; hands out principals for auth tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> PortResult<(AuthSession, Principal)>;

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<(AuthSession, Principal)>;

    async fn sign_out(&self, token: &str) -> PortResult<()>;

    /// `None` when the token is unknown or expired.
    async fn current_principal(&self, token: &str) -> PortResult<Option<Principal>>;

    async fn subscribe_principal_changes(&self) -> PortResult<PrincipalStream>;
}

/// Source of the current time, injected so expiry and deadlines are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
