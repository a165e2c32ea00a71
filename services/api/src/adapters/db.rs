//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `MarketStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Every multi-document write set runs inside one transaction, and every
//! state transition is a conditional `UPDATE ... WHERE <expected state>`, so
//! concurrent claims and accepts resolve to exactly one winner. Live
//! subscribers are served from an in-process `ChangeHub` after each commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribe_market_core::domain::{
    Assignment, AssignmentListing, AssignmentStatus, ChatMessage, ChatPhase, ChatSession,
    Notification, NotificationInbox, Participant, Request, RequestKind, RequestStatus, Review,
    UserRecord, WriterProfile, WriterTerms,
};
use scribe_market_core::feed::ChangeHub;
use scribe_market_core::ports::{
    Change, ChangeStream, Delivery, Handover, MarketStore, PortError, PortResult, Rejection,
    RequestDraft, SessionClosure, Topic,
};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `MarketStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    hub: ChangeHub,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hub: ChangeHub::default(),
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Loads a fresh snapshot for each watched topic and pushes it to the hub.
    async fn publish(&self, topics: Vec<Topic>) {
        for topic in topics {
            if !self.hub.has_subscribers(&topic) {
                continue;
            }
            match self.snapshot(&topic).await {
                Ok(change) => self.hub.publish(&topic, change),
                Err(e) => warn!(?topic, "Failed to load change snapshot: {:?}", e),
            }
        }
    }

    async fn snapshot(&self, topic: &Topic) -> PortResult<Change> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        Ok(match topic {
            Topic::Inbox(user_id) => Change::Inbox(load_inbox(&mut conn, *user_id).await?),
            Topic::Chat(chat_id) => match load_chat(&mut conn, chat_id).await? {
                Some(chat) => Change::Chat(chat),
                None => Change::ChatClosed(chat_id.clone()),
            },
            Topic::OpenAssignments => Change::OpenAssignments(load_open_listings(&mut conn).await?),
        })
    }
}

//=========================================================================================
// Error Helpers
//=========================================================================================

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn unique_violation(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

fn corrupt(what: &str, value: &str) -> PortError {
    PortError::Unexpected(format!("Stored {} '{}' is not recognised", what, value))
}

/// Page counts are stored as `INTEGER`.
fn page_column(pages: u32) -> PortResult<i32> {
    i32::try_from(pages)
        .map_err(|_| PortError::LimitReached(format!("Page count {} is out of range", pages)))
}

fn inbox_topics<'a>(deliveries: impl IntoIterator<Item = &'a Delivery>) -> Vec<Topic> {
    deliveries
        .into_iter()
        .map(|d| Topic::Inbox(d.recipient))
        .collect()
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_SELECT: &str = "SELECT u.id, u.username, u.email, u.avatar_url, u.is_writer, u.created_at, \
     w.bio, w.price_per_page, w.min_pages, w.max_pages, w.is_available, w.rating, \
     w.tasks_completed, w.tasks_chosen \
     FROM users u LEFT JOIN writer_profiles w ON w.user_id = u.id";

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    avatar_url: Option<String>,
    is_writer: bool,
    created_at: DateTime<Utc>,
    bio: Option<String>,
    price_per_page: Option<i64>,
    min_pages: Option<i32>,
    max_pages: Option<i32>,
    is_available: Option<bool>,
    rating: Option<f64>,
    tasks_completed: Option<i32>,
    tasks_chosen: Option<i32>,
}
impl UserRow {
    fn to_domain(self, reviews: Vec<Review>) -> UserRecord {
        let writer_profile = match (self.bio, self.price_per_page) {
            (Some(bio), Some(price_per_page)) => Some(WriterProfile {
                bio,
                price_per_page,
                min_pages: self.min_pages.unwrap_or(1) as u32,
                max_pages: self.max_pages.unwrap_or(1) as u32,
                is_available: self.is_available.unwrap_or(false),
                rating: self.rating.unwrap_or(0.0),
                tasks_completed: self.tasks_completed.unwrap_or(0) as u32,
                tasks_chosen: self.tasks_chosen.unwrap_or(0) as u32,
                reviews,
            }),
            _ => None,
        };
        UserRecord {
            id: self.id,
            username: self.username,
            email: self.email,
            avatar_url: self.avatar_url,
            is_writer: self.is_writer,
            writer_profile,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ReviewRow {
    id: Uuid,
    writer_id: Uuid,
    reviewer_id: Uuid,
    assignment_id: Option<Uuid>,
    rating: i16,
    comment: String,
    task_completed: bool,
    created_at: DateTime<Utc>,
}
impl ReviewRow {
    fn to_domain(self) -> Review {
        Review {
            id: self.id,
            writer_id: self.writer_id,
            reviewer_id: self.reviewer_id,
            assignment_id: self.assignment_id,
            rating: self.rating as u8,
            comment: self.comment,
            task_completed: self.task_completed,
            created_at: self.created_at,
        }
    }
}

const ASSIGNMENT_COLUMNS: &str = "a.id, a.owner_id, a.writer_id, a.title, a.description, a.pages, \
     a.rate_per_page, a.deadline, a.status, a.is_assigned, a.is_finished, a.rating, a.created_at";

#[derive(FromRow)]
struct AssignmentRow {
    id: Uuid,
    owner_id: Uuid,
    writer_id: Option<Uuid>,
    title: String,
    description: String,
    pages: i32,
    rate_per_page: i64,
    deadline: DateTime<Utc>,
    status: String,
    is_assigned: bool,
    is_finished: bool,
    rating: Option<i16>,
    created_at: DateTime<Utc>,
}
impl AssignmentRow {
    fn to_domain(self) -> PortResult<Assignment> {
        let status =
            AssignmentStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;
        Ok(Assignment {
            id: self.id,
            owner_id: self.owner_id,
            writer_id: self.writer_id,
            title: self.title,
            description: self.description,
            pages: self.pages as u32,
            rate_per_page: self.rate_per_page,
            deadline: self.deadline,
            status,
            is_assigned: self.is_assigned,
            is_finished: self.is_finished,
            rating: self.rating.map(|r| r as u8),
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct ListingRow {
    #[sqlx(flatten)]
    assignment: AssignmentRow,
    pending_requests: i64,
}

const REQUEST_COLUMNS: &str = "id, kind, requester_id, target_id, assignment_id, pages, \
     rate_per_page, total_cost, deadline, status, created_at, expires_at";

#[derive(FromRow)]
struct RequestRow {
    id: Uuid,
    kind: String,
    requester_id: Uuid,
    target_id: Uuid,
    assignment_id: Uuid,
    pages: i32,
    rate_per_page: i64,
    total_cost: i64,
    deadline: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}
impl RequestRow {
    fn to_domain(self) -> PortResult<Request> {
        Ok(Request {
            id: self.id,
            kind: RequestKind::parse(&self.kind).ok_or_else(|| corrupt("kind", &self.kind))?,
            requester_id: self.requester_id,
            target_id: self.target_id,
            assignment_id: self.assignment_id,
            pages: self.pages as u32,
            rate_per_page: self.rate_per_page,
            total_cost: self.total_cost,
            deadline: self.deadline,
            status: RequestStatus::parse(&self.status)
                .ok_or_else(|| corrupt("status", &self.status))?,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(FromRow)]
struct NotificationRow {
    id: Uuid,
    message: String,
    request_id: Option<Uuid>,
    assignment_id: Option<Uuid>,
    chat_id: Option<String>,
    read: bool,
    created_at: DateTime<Utc>,
}
impl NotificationRow {
    fn to_domain(self) -> Notification {
        Notification {
            id: self.id,
            message: self.message,
            request_id: self.request_id,
            assignment_id: self.assignment_id,
            chat_id: self.chat_id,
            read: self.read,
            created_at: self.created_at,
        }
    }
}

const CHAT_COLUMNS: &str =
    "c.id, c.assignment_id, c.owner_id, c.writer_id, c.owner_ended, c.writer_ended, c.typing, c.created_at";

#[derive(FromRow)]
struct ChatRow {
    id: String,
    assignment_id: Uuid,
    owner_id: Uuid,
    writer_id: Uuid,
    owner_ended: bool,
    writer_ended: bool,
    typing: Option<Uuid>,
    created_at: DateTime<Utc>,
}
impl ChatRow {
    fn to_domain(self, messages: Vec<ChatMessage>) -> ChatSession {
        ChatSession {
            id: self.id,
            assignment_id: self.assignment_id,
            owner_id: self.owner_id,
            writer_id: self.writer_id,
            messages,
            owner_ended: self.owner_ended,
            writer_ended: self.writer_ended,
            typing: self.typing,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    sender_id: Uuid,
    sender_name: String,
    text: String,
    read: bool,
    created_at: DateTime<Utc>,
}
impl MessageRow {
    fn to_domain(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            text: self.text,
            read: self.read,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// Shared Loaders (usable on a pooled connection or inside a transaction)
//=========================================================================================

async fn load_reviews(conn: &mut PgConnection, writer_id: Uuid) -> PortResult<Vec<Review>> {
    let rows = sqlx::query_as::<_, ReviewRow>(
        "SELECT id, writer_id, reviewer_id, assignment_id, rating, comment, task_completed, created_at \
         FROM reviews WHERE writer_id = $1 ORDER BY created_at ASC",
    )
    .bind(writer_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(unexpected)?;
    Ok(rows.into_iter().map(ReviewRow::to_domain).collect())
}

async fn load_user(conn: &mut PgConnection, user_id: Uuid) -> PortResult<UserRecord> {
    let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE u.id = $1", USER_SELECT))
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
    let reviews = load_reviews(conn, user_id).await?;
    Ok(row.to_domain(reviews))
}

async fn load_assignment(conn: &mut PgConnection, assignment_id: Uuid) -> PortResult<Assignment> {
    sqlx::query_as::<_, AssignmentRow>(&format!(
        "SELECT {} FROM assignments a WHERE a.id = $1",
        ASSIGNMENT_COLUMNS
    ))
    .bind(assignment_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(unexpected)?
    .ok_or_else(|| PortError::NotFound(format!("Assignment {} not found", assignment_id)))?
    .to_domain()
}

async fn load_open_listings(conn: &mut PgConnection) -> PortResult<Vec<AssignmentListing>> {
    let rows = sqlx::query_as::<_, ListingRow>(&format!(
        "SELECT {}, (SELECT COUNT(*) FROM requests r \
            WHERE r.assignment_id = a.id AND r.status = 'pending') AS pending_requests \
         FROM assignments a WHERE NOT a.is_assigned \
            AND NOT EXISTS (SELECT 1 FROM requests p WHERE p.assignment_id = a.id \
                AND p.kind = 'user_to_writer' AND p.status = 'pending') \
         ORDER BY a.created_at ASC",
        ASSIGNMENT_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await
    .map_err(unexpected)?;

    rows.into_iter()
        .map(|row| {
            let assignment = row.assignment.to_domain()?;
            Ok(AssignmentListing {
                total_price: assignment.total_price(),
                assignment,
                pending_requests: row.pending_requests as usize,
            })
        })
        .collect()
}

async fn load_inbox(conn: &mut PgConnection, user_id: Uuid) -> PortResult<NotificationInbox> {
    let rows = sqlx::query_as::<_, NotificationRow>(
        "SELECT id, message, request_id, assignment_id, chat_id, read, created_at \
         FROM notifications WHERE recipient_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(unexpected)?;
    Ok(NotificationInbox {
        user_id,
        notifications: rows.into_iter().map(NotificationRow::to_domain).collect(),
    })
}

async fn load_messages(conn: &mut PgConnection, chat_id: &str) -> PortResult<Vec<ChatMessage>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT id, sender_id, sender_name, text, read, created_at \
         FROM chat_messages WHERE chat_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(chat_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(unexpected)?;
    Ok(rows.into_iter().map(MessageRow::to_domain).collect())
}

async fn load_chat(conn: &mut PgConnection, chat_id: &str) -> PortResult<Option<ChatSession>> {
    let row = sqlx::query_as::<_, ChatRow>(&format!(
        "SELECT {} FROM chats c WHERE c.id = $1",
        CHAT_COLUMNS
    ))
    .bind(chat_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(unexpected)?;
    match row {
        Some(row) => {
            let messages = load_messages(conn, &row.id).await?;
            Ok(Some(row.to_domain(messages)))
        }
        None => Ok(None),
    }
}

async fn require_chat(conn: &mut PgConnection, chat_id: &str) -> PortResult<ChatSession> {
    load_chat(conn, chat_id)
        .await?
        .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))
}

async fn hydrate_chats(conn: &mut PgConnection, rows: Vec<ChatRow>) -> PortResult<Vec<ChatSession>> {
    let mut chats = Vec::with_capacity(rows.len());
    for row in rows {
        let messages = load_messages(conn, &row.id).await?;
        chats.push(row.to_domain(messages));
    }
    Ok(chats)
}

async fn insert_notification(conn: &mut PgConnection, delivery: &Delivery) -> PortResult<()> {
    let n = &delivery.notification;
    sqlx::query(
        "INSERT INTO notifications (id, recipient_id, message, request_id, assignment_id, chat_id, read, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(n.id)
    .bind(delivery.recipient)
    .bind(&n.message)
    .bind(n.request_id)
    .bind(n.assignment_id)
    .bind(&n.chat_id)
    .bind(n.read)
    .bind(n.created_at)
    .execute(&mut *conn)
    .await
    .map_err(unexpected)?;
    Ok(())
}

/// Serialises quota checks for one user within the current transaction.
async fn lock_quota(conn: &mut PgConnection, user_id: Uuid) -> PortResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(unexpected)?;
    Ok(())
}

async fn count_active_assignments(conn: &mut PgConnection, owner_id: Uuid) -> PortResult<usize> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM assignments WHERE owner_id = $1 AND NOT is_finished",
    )
    .bind(owner_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(unexpected)?;
    Ok(count as usize)
}

async fn insert_assignment_row(conn: &mut PgConnection, a: &Assignment) -> PortResult<()> {
    sqlx::query(
        "INSERT INTO assignments (id, owner_id, writer_id, title, description, pages, rate_per_page, \
         deadline, status, is_assigned, is_finished, rating, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(a.id)
    .bind(a.owner_id)
    .bind(a.writer_id)
    .bind(&a.title)
    .bind(&a.description)
    .bind(page_column(a.pages)?)
    .bind(a.rate_per_page)
    .bind(a.deadline)
    .bind(a.status.as_str())
    .bind(a.is_assigned)
    .bind(a.is_finished)
    .bind(a.rating.map(i16::from))
    .bind(a.created_at)
    .execute(&mut *conn)
    .await
    .map_err(unexpected)?;
    Ok(())
}

//=========================================================================================
// `MarketStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MarketStore for DbAdapter {
    async fn create_user(&self, user: &UserRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO users (id, username, email, avatar_url, is_writer, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.avatar_url)
        .bind(user.is_writer)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(constraint) if constraint == "users_pkey" => {
                PortError::Conflict(format!("User {} is already onboarded", user.id))
            }
            Some(_) => {
                PortError::Conflict(format!("Username '{}' is already taken", user.username))
            }
            None => unexpected(e),
        })?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<UserRecord> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        load_user(&mut conn, user_id).await
    }

    async fn find_user_by_username(&self, username: &str) -> PortResult<UserRecord> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "{} WHERE LOWER(u.username) = LOWER($1)",
            USER_SELECT
        ))
        .bind(username)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User '{}' not found", username)))?;
        let reviews = load_reviews(&mut conn, row.id).await?;
        Ok(row.to_domain(reviews))
    }

    async fn save_writer_terms(
        &self,
        user_id: Uuid,
        terms: &WriterTerms,
    ) -> PortResult<UserRecord> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let updated = sqlx::query("UPDATE users SET is_writer = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        if updated.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        sqlx::query(
            "INSERT INTO writer_profiles (user_id, bio, price_per_page, min_pages, max_pages, is_available) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id) DO UPDATE SET bio = EXCLUDED.bio, \
                price_per_page = EXCLUDED.price_per_page, min_pages = EXCLUDED.min_pages, \
                max_pages = EXCLUDED.max_pages, is_available = EXCLUDED.is_available",
        )
        .bind(user_id)
        .bind(&terms.bio)
        .bind(terms.price_per_page)
        .bind(page_column(terms.min_pages)?)
        .bind(page_column(terms.max_pages)?)
        .bind(terms.is_available)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        let user = load_user(&mut tx, user_id).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(user)
    }

    async fn list_available_writers(&self) -> PortResult<Vec<UserRecord>> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "{} WHERE u.is_writer AND w.is_available ORDER BY u.username ASC",
            USER_SELECT
        ))
        .fetch_all(&mut *conn)
        .await
        .map_err(unexpected)?;
        let mut writers = Vec::with_capacity(rows.len());
        for row in rows {
            let reviews = load_reviews(&mut conn, row.id).await?;
            writers.push(row.to_domain(reviews));
        }
        Ok(writers)
    }

    async fn insert_assignment(&self, assignment: &Assignment, max_active: usize) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        lock_quota(&mut tx, assignment.owner_id).await?;
        if count_active_assignments(&mut tx, assignment.owner_id).await? >= max_active {
            return Err(PortError::LimitReached(format!(
                "An owner may have at most {} active assignments",
                max_active
            )));
        }
        insert_assignment_row(&mut tx, assignment).await?;
        tx.commit().await.map_err(unexpected)?;
        self.publish(vec![Topic::OpenAssignments]).await;
        Ok(())
    }

    async fn get_assignment(&self, assignment_id: Uuid) -> PortResult<Assignment> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        load_assignment(&mut conn, assignment_id).await
    }

    async fn list_open_assignments(&self) -> PortResult<Vec<AssignmentListing>> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        load_open_listings(&mut conn).await
    }

    async fn list_assignments_by_owner(&self, owner_id: Uuid) -> PortResult<Vec<Assignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {} FROM assignments a WHERE a.owner_id = $1 ORDER BY a.created_at ASC",
            ASSIGNMENT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        rows.into_iter().map(AssignmentRow::to_domain).collect()
    }

    async fn delete_open_assignment(&self, assignment_id: Uuid, owner_id: Uuid) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let assignment = load_assignment(&mut tx, assignment_id).await?;
        if assignment.owner_id != owner_id {
            return Err(PortError::Unauthorized);
        }
        let touched: Vec<(Uuid,)> = sqlx::query_as(
            "DELETE FROM notifications WHERE request_id IN \
                (SELECT id FROM requests WHERE assignment_id = $1) \
             RETURNING recipient_id",
        )
        .bind(assignment_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;
        let deleted = sqlx::query("DELETE FROM assignments WHERE id = $1 AND NOT is_assigned")
            .bind(assignment_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        if deleted.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "Assignment {} has already been assigned",
                assignment_id
            )));
        }
        tx.commit().await.map_err(unexpected)?;

        let mut topics: Vec<Topic> = touched.into_iter().map(|(id,)| Topic::Inbox(id)).collect();
        topics.push(Topic::OpenAssignments);
        self.publish(topics).await;
        Ok(())
    }

    async fn hand_over(&self, handover: &Handover) -> PortResult<ChatSession> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let assigned = sqlx::query(
            "UPDATE assignments SET is_assigned = TRUE, writer_id = $2, status = $3 \
             WHERE id = $1 AND NOT is_assigned AND NOT is_finished",
        )
        .bind(handover.assignment_id)
        .bind(handover.writer_id)
        .bind(AssignmentStatus::InProgress.as_str())
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if assigned.rows_affected() == 0 {
            // Distinguish a missing assignment from one somebody else already took.
            load_assignment(&mut tx, handover.assignment_id).await?;
            return Err(PortError::Conflict(format!(
                "Assignment {} has already been assigned",
                handover.assignment_id
            )));
        }

        let mut topics = inbox_topics(&handover.notices);
        if let Some(accepted) = &handover.accepted_request {
            let updated = sqlx::query(
                "UPDATE requests SET status = 'accepted' WHERE id = $1 AND status = 'pending'",
            )
            .bind(accepted.request_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
            if updated.rows_affected() == 0 {
                return Err(PortError::Conflict(format!(
                    "Request {} is no longer pending",
                    accepted.request_id
                )));
            }
            sqlx::query("DELETE FROM notifications WHERE recipient_id = $1 AND request_id = $2")
                .bind(accepted.recipient)
                .bind(accepted.request_id)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
            topics.push(Topic::Inbox(accepted.recipient));
        }

        sqlx::query("UPDATE writer_profiles SET tasks_chosen = tasks_chosen + 1 WHERE user_id = $1")
            .bind(handover.writer_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let chat = &handover.chat;
        sqlx::query(
            "INSERT INTO chats (id, assignment_id, owner_id, writer_id, owner_ended, writer_ended, typing, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&chat.id)
        .bind(chat.assignment_id)
        .bind(chat.owner_id)
        .bind(chat.writer_id)
        .bind(chat.owner_ended)
        .bind(chat.writer_ended)
        .bind(chat.typing)
        .bind(chat.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => PortError::Conflict(format!("Chat {} already exists", chat.id)),
            None => unexpected(e),
        })?;

        for notice in &handover.notices {
            insert_notification(&mut tx, notice).await?;
        }
        tx.commit().await.map_err(unexpected)?;

        topics.push(Topic::OpenAssignments);
        topics.push(Topic::Chat(chat.id.clone()));
        self.publish(topics).await;
        Ok(chat.clone())
    }

    async fn open_request(&self, draft: &RequestDraft) -> PortResult<()> {
        let request = &draft.request;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        lock_quota(&mut tx, request.requester_id).await?;

        match &draft.new_assignment {
            Some(assignment) => {
                if let Some(max_active) = draft.max_active {
                    if assignment.owner_id != request.requester_id {
                        lock_quota(&mut tx, assignment.owner_id).await?;
                    }
                    if count_active_assignments(&mut tx, assignment.owner_id).await? >= max_active {
                        return Err(PortError::LimitReached(format!(
                            "An owner may have at most {} active assignments",
                            max_active
                        )));
                    }
                }
            }
            None => {
                let row: Option<(bool,)> = sqlx::query_as(
                    "SELECT is_assigned FROM assignments WHERE id = $1 FOR UPDATE",
                )
                .bind(request.assignment_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;
                match row {
                    None => {
                        return Err(PortError::NotFound(format!(
                            "Assignment {} not found",
                            request.assignment_id
                        )))
                    }
                    Some((true,)) => {
                        return Err(PortError::Conflict(format!(
                            "Assignment {} has already been assigned",
                            request.assignment_id
                        )))
                    }
                    Some((false,)) => {}
                }
            }
        }

        if let Some(max_pending) = draft.max_pending {
            let (pending,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM requests WHERE requester_id = $1 AND status = 'pending'",
            )
            .bind(request.requester_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(unexpected)?;
            if pending as usize >= max_pending {
                return Err(PortError::LimitReached(format!(
                    "At most {} pending requests are allowed at a time",
                    max_pending
                )));
            }
        }

        if let Some(assignment) = &draft.new_assignment {
            insert_assignment_row(&mut tx, assignment).await?;
        }
        sqlx::query(&format!(
            "INSERT INTO requests ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            REQUEST_COLUMNS
        ))
        .bind(request.id)
        .bind(request.kind.as_str())
        .bind(request.requester_id)
        .bind(request.target_id)
        .bind(request.assignment_id)
        .bind(page_column(request.pages)?)
        .bind(request.rate_per_page)
        .bind(request.total_cost)
        .bind(request.deadline)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => PortError::Conflict(
                "A pending request for this assignment already exists".to_string(),
            ),
            None => unexpected(e),
        })?;
        insert_notification(&mut tx, &draft.notice).await?;
        tx.commit().await.map_err(unexpected)?;

        self.publish(vec![
            Topic::Inbox(draft.notice.recipient),
            Topic::OpenAssignments,
        ])
        .await;
        Ok(())
    }

    async fn get_request(&self, request_id: Uuid) -> PortResult<Request> {
        sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Request {} not found", request_id)))?
        .to_domain()
    }

    async fn reject_request(&self, rejection: &Rejection) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let updated = sqlx::query(
            "UPDATE requests SET status = 'rejected' WHERE id = $1 AND status = 'pending'",
        )
        .bind(rejection.request_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if updated.rows_affected() == 0 {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM requests WHERE id = $1")
                .bind(rejection.request_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;
            return Err(match exists {
                Some(_) => PortError::Conflict(format!(
                    "Request {} is no longer pending",
                    rejection.request_id
                )),
                None => PortError::NotFound(format!("Request {} not found", rejection.request_id)),
            });
        }
        sqlx::query("DELETE FROM notifications WHERE recipient_id = $1 AND request_id = $2")
            .bind(rejection.recipient)
            .bind(rejection.request_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        for notice in &rejection.notices {
            insert_notification(&mut tx, notice).await?;
        }
        tx.commit().await.map_err(unexpected)?;

        let mut topics = inbox_topics(&rejection.notices);
        topics.push(Topic::Inbox(rejection.recipient));
        topics.push(Topic::OpenAssignments);
        self.publish(topics).await;
        Ok(())
    }

    async fn purge_expired_requests(&self, now: DateTime<Utc>) -> PortResult<Vec<Request>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "DELETE FROM requests WHERE status = 'pending' AND expires_at <= $1 RETURNING {}",
            REQUEST_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let expired: Vec<Request> = rows
            .into_iter()
            .map(RequestRow::to_domain)
            .collect::<PortResult<_>>()?;
        let ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
        let touched: Vec<(Uuid,)> = sqlx::query_as(
            "DELETE FROM notifications WHERE request_id = ANY($1) RETURNING recipient_id",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        let mut topics: Vec<Topic> = touched.into_iter().map(|(id,)| Topic::Inbox(id)).collect();
        topics.dedup();
        topics.push(Topic::OpenAssignments);
        self.publish(topics).await;
        Ok(expired)
    }

    async fn push_notification(&self, delivery: &Delivery) -> PortResult<()> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        insert_notification(&mut conn, delivery).await?;
        self.publish(vec![Topic::Inbox(delivery.recipient)]).await;
        Ok(())
    }

    async fn get_inbox(&self, user_id: Uuid) -> PortResult<NotificationInbox> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        load_inbox(&mut conn, user_id).await
    }

    async fn remove_notification(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> PortResult<Notification> {
        let removed = sqlx::query_as::<_, NotificationRow>(
            "DELETE FROM notifications WHERE id = $1 AND recipient_id = $2 \
             RETURNING id, message, request_id, assignment_id, chat_id, read, created_at",
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Notification {} not found", notification_id)))?;
        self.publish(vec![Topic::Inbox(user_id)]).await;
        Ok(removed.to_domain())
    }

    async fn get_chat(&self, chat_id: &str) -> PortResult<ChatSession> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        require_chat(&mut conn, chat_id).await
    }

    async fn find_chat_by_assignment(&self, assignment_id: Uuid) -> PortResult<ChatSession> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {} FROM chats c WHERE c.assignment_id = $1",
            CHAT_COLUMNS
        ))
        .bind(assignment_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("No chat for assignment {}", assignment_id)))?;
        let messages = load_messages(&mut conn, &row.id).await?;
        Ok(row.to_domain(messages))
    }

    async fn list_chats_for(&self, user_id: Uuid) -> PortResult<Vec<ChatSession>> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {} FROM chats c WHERE c.owner_id = $1 OR c.writer_id = $1 ORDER BY c.created_at ASC",
            CHAT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(unexpected)?;
        hydrate_chats(&mut conn, rows).await
    }

    async fn append_message(&self, chat_id: &str, message: &ChatMessage) -> PortResult<ChatSession> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let locked: Option<(String,)> = sqlx::query_as("SELECT id FROM chats WHERE id = $1 FOR UPDATE")
            .bind(chat_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?;
        if locked.is_none() {
            return Err(PortError::NotFound(format!("Chat {} not found", chat_id)));
        }
        sqlx::query(
            "INSERT INTO chat_messages (id, chat_id, sender_id, sender_name, text, read, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(chat_id)
        .bind(message.sender_id)
        .bind(&message.sender_name)
        .bind(&message.text)
        .bind(message.read)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        sqlx::query("UPDATE chats SET typing = NULL WHERE id = $1 AND typing = $2")
            .bind(chat_id)
            .bind(message.sender_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        let chat = require_chat(&mut tx, chat_id).await?;
        tx.commit().await.map_err(unexpected)?;

        self.publish(vec![Topic::Chat(chat_id.to_string())]).await;
        Ok(chat)
    }

    async fn set_typing(&self, chat_id: &str, holder: Option<Uuid>) -> PortResult<ChatSession> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let updated = sqlx::query("UPDATE chats SET typing = $2 WHERE id = $1")
            .bind(chat_id)
            .bind(holder)
            .execute(&mut *conn)
            .await
            .map_err(unexpected)?;
        if updated.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Chat {} not found", chat_id)));
        }
        let chat = require_chat(&mut conn, chat_id).await?;
        drop(conn);
        self.publish(vec![Topic::Chat(chat_id.to_string())]).await;
        Ok(chat)
    }

    async fn toggle_end_chat(&self, chat_id: &str, who: Participant) -> PortResult<ChatSession> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {} FROM chats c WHERE c.id = $1 FOR UPDATE",
            CHAT_COLUMNS
        ))
        .bind(chat_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))?;

        let mut chat = row.to_domain(Vec::new());
        if !chat.toggle_end(who) {
            return Err(PortError::Conflict(format!(
                "Chat {} is already awaiting feedback",
                chat_id
            )));
        }
        sqlx::query("UPDATE chats SET owner_ended = $2, writer_ended = $3 WHERE id = $1")
            .bind(chat_id)
            .bind(chat.owner_ended)
            .bind(chat.writer_ended)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        chat.messages = load_messages(&mut tx, chat_id).await?;
        tx.commit().await.map_err(unexpected)?;

        self.publish(vec![Topic::Chat(chat_id.to_string())]).await;
        Ok(chat)
    }

    async fn force_end_chat(&self, chat_id: &str) -> PortResult<ChatSession> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let updated =
            sqlx::query("UPDATE chats SET owner_ended = TRUE, writer_ended = TRUE WHERE id = $1")
                .bind(chat_id)
                .execute(&mut *conn)
                .await
                .map_err(unexpected)?;
        if updated.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Chat {} not found", chat_id)));
        }
        let chat = require_chat(&mut conn, chat_id).await?;
        drop(conn);
        self.publish(vec![Topic::Chat(chat_id.to_string())]).await;
        Ok(chat)
    }

    async fn mark_chat_read(&self, chat_id: &str, reader: Uuid) -> PortResult<ChatSession> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let changed = sqlx::query(
            "UPDATE chat_messages SET read = TRUE WHERE chat_id = $1 AND sender_id <> $2 AND NOT read",
        )
        .bind(chat_id)
        .bind(reader)
        .execute(&mut *conn)
        .await
        .map_err(unexpected)?
        .rows_affected();
        let chat = require_chat(&mut conn, chat_id).await?;
        drop(conn);
        if changed > 0 {
            self.publish(vec![Topic::Chat(chat_id.to_string())]).await;
        }
        Ok(chat)
    }

    async fn list_overdue_chats(&self, now: DateTime<Utc>) -> PortResult<Vec<ChatSession>> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {} FROM chats c JOIN assignments a ON a.id = c.assignment_id \
             WHERE NOT (c.owner_ended AND c.writer_ended) AND a.deadline <= $1",
            CHAT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *conn)
        .await
        .map_err(unexpected)?;
        hydrate_chats(&mut conn, rows).await
    }

    async fn close_session(&self, closure: &SessionClosure) -> PortResult<WriterProfile> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let chat = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {} FROM chats c WHERE c.id = $1 FOR UPDATE",
            CHAT_COLUMNS
        ))
        .bind(&closure.chat_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", closure.chat_id)))?
        .to_domain(Vec::new());
        if chat.phase() != ChatPhase::AwaitingFeedback {
            return Err(PortError::Conflict(format!(
                "Chat {} has not been ended by both participants",
                closure.chat_id
            )));
        }

        let mut assignment = load_assignment(&mut tx, closure.assignment_id).await?;
        if !assignment.finish(closure.review.rating) {
            return Err(PortError::Conflict(format!(
                "Assignment {} cannot be finished",
                closure.assignment_id
            )));
        }

        // Serializes concurrent reviews of the same writer.
        sqlx::query("SELECT 1 FROM writer_profiles WHERE user_id = $1 FOR UPDATE")
            .bind(closure.writer_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?;
        let mut profile = load_user(&mut tx, closure.writer_id)
            .await?
            .writer_profile
            .ok_or_else(|| {
                PortError::NotFound(format!("Writer profile {} not found", closure.writer_id))
            })?;
        profile.record_review(closure.review.clone());

        let review = &closure.review;
        sqlx::query(
            "INSERT INTO reviews (id, writer_id, reviewer_id, assignment_id, rating, comment, task_completed, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(review.id)
        .bind(review.writer_id)
        .bind(review.reviewer_id)
        .bind(review.assignment_id)
        .bind(i16::from(review.rating))
        .bind(&review.comment)
        .bind(review.task_completed)
        .bind(review.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        sqlx::query(
            "UPDATE writer_profiles SET rating = $2, tasks_completed = $3 WHERE user_id = $1",
        )
        .bind(closure.writer_id)
        .bind(profile.rating)
        .bind(i32::try_from(profile.tasks_completed).unwrap_or(i32::MAX))
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        let touched: Vec<(Uuid,)> = sqlx::query_as(
            "DELETE FROM notifications WHERE request_id IN \
                (SELECT id FROM requests WHERE assignment_id = $1) \
             RETURNING recipient_id",
        )
        .bind(assignment.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;
        // Chat, messages and requests go with the assignment through the cascades.
        sqlx::query("DELETE FROM assignments WHERE id = $1")
            .bind(assignment.id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        for notice in &closure.notices {
            insert_notification(&mut tx, notice).await?;
        }
        tx.commit().await.map_err(unexpected)?;

        let mut topics = inbox_topics(&closure.notices);
        topics.extend(touched.into_iter().map(|(id,)| Topic::Inbox(id)));
        topics.push(Topic::Chat(closure.chat_id.clone()));
        self.publish(topics).await;
        Ok(profile)
    }

    async fn subscribe(&self, topic: Topic) -> PortResult<ChangeStream> {
        Ok(self.hub.subscribe(topic))
    }
}
