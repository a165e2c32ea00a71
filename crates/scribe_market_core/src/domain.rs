//! crates/scribe_market_core/src/domain.rs
//!
//! Defines the core data structures of the marketplace: users and writer
//! profiles, assignments, requests, notification inboxes and chat sessions.
//! These structs are independent of any database; they derive `serde` so the
//! same shapes travel over the HTTP and WebSocket surfaces.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest rating a review may carry.
pub const MAX_RATING: u8 = 5;
/// Lowest rating a review may carry.
pub const MIN_RATING: u8 = 1;
/// Upper bound on assignment titles, in characters.
pub const MAX_TITLE_LEN: usize = 120;
/// Largest page count any assignment or writer range may name.
pub const MAX_PAGES: u32 = i32::MAX as u32;
/// Title shown for assignments whose owner left it blank in older records.
pub const UNTITLED_ASSIGNMENT: &str = "Untitled Assignment";

//=========================================================================================
// Identity and Users
//=========================================================================================

/// The authenticated identity acting on the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Principal {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

// A browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Emitted by the identity provider whenever a principal signs in or out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrincipalChange {
    SignedIn { principal: Principal },
    SignedOut { user_id: Uuid },
}

/// The marketplace record of a user, created at onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub is_writer: bool,
    pub writer_profile: Option<WriterProfile>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Builds a fresh, non-writer record for a principal.
    pub fn onboard(principal: &Principal, username: String, now: DateTime<Utc>) -> Self {
        Self {
            id: principal.id,
            username,
            email: principal.email.clone(),
            avatar_url: principal.avatar_url.clone(),
            is_writer: false,
            writer_profile: None,
            created_at: now,
        }
    }

    /// True when the user is a writer currently taking work.
    pub fn is_available_writer(&self) -> bool {
        self.is_writer
            && self
                .writer_profile
                .as_ref()
                .map(|p| p.is_available)
                .unwrap_or(false)
    }
}

//=========================================================================================
// Writer Profiles and Reviews
//=========================================================================================

/// Service terms and track record of a writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WriterProfile {
    pub bio: String,
    pub price_per_page: i64,
    pub min_pages: u32,
    pub max_pages: u32,
    pub is_available: bool,
    /// Mean rating over completed tasks, always within `0.0..=5.0`.
    pub rating: f64,
    pub tasks_completed: u32,
    /// Number of times the writer has been handed an assignment.
    pub tasks_chosen: u32,
    pub reviews: Vec<Review>,
}

impl WriterProfile {
    pub fn new(bio: String, price_per_page: i64, min_pages: u32, max_pages: u32) -> Self {
        Self {
            bio,
            price_per_page,
            min_pages,
            max_pages,
            is_available: false,
            rating: 0.0,
            tasks_completed: 0,
            tasks_chosen: 0,
            reviews: Vec::new(),
        }
    }

    pub fn accepts_pages(&self, pages: u32) -> bool {
        (self.min_pages..=self.max_pages).contains(&pages)
    }

    /// Appends a review and folds it into the running average.
    ///
    /// Only reviews of completed tasks move the average, so the weight of the
    /// old mean is always `tasks_completed`.
    pub fn record_review(&mut self, review: Review) {
        if review.task_completed {
            let count = f64::from(self.tasks_completed);
            let folded = (self.rating * count + f64::from(review.rating)) / (count + 1.0);
            self.rating = folded.clamp(0.0, f64::from(MAX_RATING));
            self.tasks_completed += 1;
        }
        self.reviews.push(review);
    }
}

/// The writer-controlled terms of a profile, without the track record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WriterTerms {
    pub bio: String,
    pub price_per_page: i64,
    pub min_pages: u32,
    pub max_pages: u32,
    pub is_available: bool,
}

impl WriterTerms {
    /// Overwrites the terms of a profile, leaving rating, counters and reviews alone.
    pub fn apply_to(&self, profile: &mut WriterProfile) {
        profile.bio = self.bio.clone();
        profile.price_per_page = self.price_per_page;
        profile.min_pages = self.min_pages;
        profile.max_pages = self.max_pages;
        profile.is_available = self.is_available;
    }

    pub fn into_profile(self) -> WriterProfile {
        let mut profile =
            WriterProfile::new(self.bio, self.price_per_page, self.min_pages, self.max_pages);
        profile.is_available = self.is_available;
        profile
    }
}

/// Feedback left by an assignment owner when a chat session closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Review {
    pub id: Uuid,
    pub writer_id: Uuid,
    pub reviewer_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub rating: u8,
    pub comment: String,
    pub task_completed: bool,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Assignments
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Finished,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AssignmentStatus::Pending),
            "in_progress" => Some(AssignmentStatus::InProgress),
            "finished" => Some(AssignmentStatus::Finished),
            _ => None,
        }
    }
}

/// A postable unit of paid writing work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Assignment {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub writer_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub pages: u32,
    pub rate_per_page: i64,
    pub deadline: DateTime<Utc>,
    pub status: AssignmentStatus,
    pub is_assigned: bool,
    pub is_finished: bool,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn total_price(&self) -> i64 {
        i64::from(self.pages).saturating_mul(self.rate_per_page)
    }

    /// Unfinished assignments count against the owner's quota.
    pub fn is_active(&self) -> bool {
        !self.is_finished
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            UNTITLED_ASSIGNMENT
        } else {
            &self.title
        }
    }

    /// Hands the assignment to a writer. Returns `false` when it was already taken.
    pub fn assign_to(&mut self, writer_id: Uuid) -> bool {
        if self.is_assigned || self.is_finished {
            return false;
        }
        self.is_assigned = true;
        self.writer_id = Some(writer_id);
        self.status = AssignmentStatus::InProgress;
        true
    }

    /// Marks the assignment finished. Unclaimed work can never be finished.
    pub fn finish(&mut self, rating: u8) -> bool {
        if !self.is_assigned || self.is_finished {
            return false;
        }
        self.is_finished = true;
        self.status = AssignmentStatus::Finished;
        self.rating = Some(rating);
        true
    }
}

/// An open assignment as shown on the available-work board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AssignmentListing {
    pub assignment: Assignment,
    pub total_price: i64,
    pub pending_requests: usize,
}

//=========================================================================================
// Requests
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// A writer asks to work an existing assignment; the owner decides.
    WriterToTask,
    /// A user proposes a new task to a writer; the writer decides.
    UserToWriter,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::WriterToTask => "writer_to_task",
            RequestKind::UserToWriter => "user_to_writer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "writer_to_task" => Some(RequestKind::WriterToTask),
            "user_to_writer" => Some(RequestKind::UserToWriter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

/// A proposal linking a user and a writer to an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Request {
    pub id: Uuid,
    pub kind: RequestKind,
    pub requester_id: Uuid,
    pub target_id: Uuid,
    pub assignment_id: Uuid,
    pub pages: u32,
    pub rate_per_page: i64,
    pub total_cost: i64,
    pub deadline: DateTime<Utc>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Request {
    /// Creates a pending request over an assignment's terms.
    pub fn pending(
        kind: RequestKind,
        requester_id: Uuid,
        target_id: Uuid,
        assignment: &Assignment,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            requester_id,
            target_id,
            assignment_id: assignment.id,
            pages: assignment.pages,
            rate_per_page: assignment.rate_per_page,
            total_cost: assignment.total_price(),
            deadline: assignment.deadline,
            status: RequestStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The writer who ends up holding the assignment if this request is accepted.
    pub fn resolved_writer(&self) -> Uuid {
        match self.kind {
            RequestKind::WriterToTask => self.requester_id,
            RequestKind::UserToWriter => self.target_id,
        }
    }
}

//=========================================================================================
// Notifications
//=========================================================================================

/// A single entry in a user's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub request_id: Option<Uuid>,
    pub assignment_id: Option<Uuid>,
    pub chat_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(message: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            request_id: None,
            assignment_id: None,
            chat_id: None,
            read: false,
            created_at: now,
        }
    }

    pub fn for_request(mut self, request: &Request) -> Self {
        self.request_id = Some(request.id);
        self.assignment_id = Some(request.assignment_id);
        self
    }

    pub fn for_chat(mut self, chat: &ChatSession) -> Self {
        self.chat_id = Some(chat.id.clone());
        self.assignment_id = Some(chat.assignment_id);
        self
    }

    /// Request notifications carry accept/reject actions; the rest are informational.
    pub fn is_actionable(&self) -> bool {
        self.request_id.is_some() && self.chat_id.is_none()
    }
}

/// The per-user queue of notifications, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NotificationInbox {
    pub user_id: Uuid,
    pub notifications: Vec<Notification>,
}

impl NotificationInbox {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            notifications: Vec::new(),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    pub fn find(&self, notification_id: Uuid) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == notification_id)
    }
}

//=========================================================================================
// Chat Sessions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Participant {
    Owner,
    Writer,
}

/// Where a live chat session stands. Closed sessions are deleted, so they have no phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ChatPhase {
    Active,
    AwaitingFeedback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub text: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// The message thread and completion handshake between an owner and a writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatSession {
    pub id: String,
    pub assignment_id: Uuid,
    pub owner_id: Uuid,
    pub writer_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub owner_ended: bool,
    pub writer_ended: bool,
    pub typing: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    /// Chat ids are derived from the assignment and writer so a session can only exist once.
    pub fn id_for(assignment_id: Uuid, writer_id: Uuid) -> String {
        format!("{}-{}", assignment_id, writer_id)
    }

    pub fn open(assignment: &Assignment, writer_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::id_for(assignment.id, writer_id),
            assignment_id: assignment.id,
            owner_id: assignment.owner_id,
            writer_id,
            messages: Vec::new(),
            owner_ended: false,
            writer_ended: false,
            typing: None,
            created_at: now,
        }
    }

    pub fn participant(&self, user_id: Uuid) -> Option<Participant> {
        if user_id == self.owner_id {
            Some(Participant::Owner)
        } else if user_id == self.writer_id {
            Some(Participant::Writer)
        } else {
            None
        }
    }

    pub fn phase(&self) -> ChatPhase {
        if self.owner_ended && self.writer_ended {
            ChatPhase::AwaitingFeedback
        } else {
            ChatPhase::Active
        }
    }

    pub fn has_ended(&self, who: Participant) -> bool {
        match who {
            Participant::Owner => self.owner_ended,
            Participant::Writer => self.writer_ended,
        }
    }

    /// Flips one participant's end-chat flag. Refused once both sides have ended.
    pub fn toggle_end(&mut self, who: Participant) -> bool {
        if self.phase() == ChatPhase::AwaitingFeedback {
            return false;
        }
        match who {
            Participant::Owner => self.owner_ended = !self.owner_ended,
            Participant::Writer => self.writer_ended = !self.writer_ended,
        }
        true
    }

    /// The typing holder, hidden from the holder themselves.
    pub fn typing_visible_to(&self, viewer: Uuid) -> Option<Uuid> {
        self.typing.filter(|holder| *holder != viewer)
    }

    pub fn unread_for(&self, viewer: Uuid) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.read && m.sender_id != viewer)
            .count()
    }

    /// Flags every message from the other participant read; returns how many changed.
    pub fn mark_read_by(&mut self, reader: Uuid) -> usize {
        let mut changed = 0;
        for message in self.messages.iter_mut() {
            if message.sender_id != reader && !message.read {
                message.read = true;
                changed += 1;
            }
        }
        changed
    }
}

/// A chat as listed for one of its participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatSummary {
    pub chat_id: String,
    pub assignment_id: Uuid,
    pub assignment_title: String,
    pub partner_id: Uuid,
    pub partner_name: String,
    pub unread: usize,
    pub phase: ChatPhase,
}

/// Time left until the linked assignment's deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Countdown {
    pub deadline: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub passed: bool,
    pub phase: ChatPhase,
}

impl Countdown {
    pub fn until(deadline: DateTime<Utc>, now: DateTime<Utc>, phase: ChatPhase) -> Self {
        let remaining = (deadline - now).num_seconds().max(0);
        Self {
            deadline,
            remaining_seconds: remaining,
            passed: now >= deadline,
            phase,
        }
    }
}
