//! Assignment lifecycle: post, claim, finish, delete.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::feedback::{FeedbackInput, FeedbackService};
use super::{notices, MarketPolicy};
use crate::domain::{
    Assignment, AssignmentListing, AssignmentStatus, ChatSession, Notification, Principal,
    WriterProfile, MAX_PAGES, MAX_TITLE_LEN,
};
use crate::error::{MarketError, MarketResult};
use crate::ports::{ChangeStream, Clock, Delivery, Handover, MarketStore, PortError, Topic};

/// What an owner fills in when posting work.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewAssignment {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub pages: u32,
    pub rate_per_page: i64,
    pub deadline: DateTime<Utc>,
}

/// Validates the input and builds an unassigned assignment. Shared with task proposals.
pub(crate) fn draft_assignment(
    owner_id: Uuid,
    input: NewAssignment,
    now: DateTime<Utc>,
) -> MarketResult<Assignment> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(MarketError::Validation("Title cannot be empty.".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(MarketError::Validation(format!(
            "Title cannot be longer than {} characters.",
            MAX_TITLE_LEN
        )));
    }
    if input.pages == 0 {
        return Err(MarketError::Validation(
            "Page count must be greater than zero.".to_string(),
        ));
    }
    if input.pages > MAX_PAGES {
        return Err(MarketError::Validation(format!(
            "Page count cannot exceed {}.",
            MAX_PAGES
        )));
    }
    if input.rate_per_page <= 0 {
        return Err(MarketError::Validation(
            "Rate per page must be greater than zero.".to_string(),
        ));
    }
    if i64::from(input.pages)
        .checked_mul(input.rate_per_page)
        .is_none()
    {
        return Err(MarketError::Validation(
            "Total price is too large.".to_string(),
        ));
    }
    if input.deadline <= now {
        return Err(MarketError::Validation(
            "Deadline must be in the future.".to_string(),
        ));
    }
    Ok(Assignment {
        id: Uuid::new_v4(),
        owner_id,
        writer_id: None,
        title,
        description: input.description.trim().to_string(),
        pages: input.pages,
        rate_per_page: input.rate_per_page,
        deadline: input.deadline,
        status: AssignmentStatus::Pending,
        is_assigned: false,
        is_finished: false,
        rating: None,
        created_at: now,
    })
}

#[derive(Clone)]
pub struct AssignmentService {
    store: Arc<dyn MarketStore>,
    clock: Arc<dyn Clock>,
    policy: MarketPolicy,
    feedback: FeedbackService,
}

impl AssignmentService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        clock: Arc<dyn Clock>,
        policy: MarketPolicy,
        feedback: FeedbackService,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            feedback,
        }
    }

    pub async fn post_assignment(
        &self,
        owner: &Principal,
        input: NewAssignment,
    ) -> MarketResult<Assignment> {
        let assignment = draft_assignment(owner.id, input, self.clock.now())?;
        self.store
            .insert_assignment(&assignment, self.policy.max_active_assignments)
            .await?;
        info!(
            assignment_id = %assignment.id,
            owner_id = %owner.id,
            total = assignment.total_price(),
            "Assignment posted"
        );
        Ok(assignment)
    }

    /// Takes an open assignment directly. The write is conditional on it still being open.
    pub async fn claim_assignment(
        &self,
        writer: &Principal,
        assignment_id: Uuid,
    ) -> MarketResult<ChatSession> {
        let record = self.store.get_user(writer.id).await.map_err(|e| match e {
            PortError::NotFound(_) => {
                MarketError::Authorization("Only writers can claim assignments".to_string())
            }
            other => other.into(),
        })?;
        if !record.is_writer {
            return Err(MarketError::Authorization(
                "Only writers can claim assignments".to_string(),
            ));
        }

        let assignment = self.store.get_assignment(assignment_id).await?;
        if assignment.owner_id == writer.id {
            return Err(MarketError::Validation(
                "You cannot claim your own assignment.".to_string(),
            ));
        }
        if assignment.is_assigned {
            return Err(MarketError::Conflict(
                "This task has already been accepted by another writer.".to_string(),
            ));
        }

        let now = self.clock.now();
        let chat = ChatSession::open(&assignment, writer.id, now);
        let title = assignment.display_title();
        let handover = Handover {
            assignment_id,
            writer_id: writer.id,
            chat: chat.clone(),
            accepted_request: None,
            notices: vec![
                Delivery {
                    recipient: assignment.owner_id,
                    notification: Notification::new(
                        notices::assigned_to_owner(title, &record.username),
                        now,
                    )
                    .for_chat(&chat),
                },
                Delivery {
                    recipient: writer.id,
                    notification: Notification::new(notices::assigned_to_writer(title), now)
                        .for_chat(&chat),
                },
            ],
        };

        let chat = self.store.hand_over(&handover).await.map_err(|e| match e {
            PortError::Conflict(_) => MarketError::Conflict(
                "This task has already been accepted by another writer.".to_string(),
            ),
            other => other.into(),
        })?;
        info!(%assignment_id, writer_id = %writer.id, chat_id = %chat.id, "Assignment claimed");
        Ok(chat)
    }

    /// Finishes claimed work by submitting the owner's feedback on its chat.
    pub async fn finish_assignment(
        &self,
        actor: &Principal,
        assignment_id: Uuid,
        input: FeedbackInput,
    ) -> MarketResult<WriterProfile> {
        let assignment = self.store.get_assignment(assignment_id).await?;
        if !assignment.is_assigned {
            return Err(MarketError::Conflict(
                "Unclaimed work cannot be finished.".to_string(),
            ));
        }
        let chat = self.store.find_chat_by_assignment(assignment_id).await?;
        self.feedback.submit_feedback(actor, &chat.id, input).await
    }

    pub async fn delete_assignment(&self, actor: &Principal, assignment_id: Uuid) -> MarketResult<()> {
        let assignment = self.store.get_assignment(assignment_id).await?;
        if assignment.owner_id != actor.id {
            warn!(%assignment_id, actor = %actor.id, "Refused delete by non-owner");
            return Err(MarketError::Authorization(
                "Only the owner can delete an assignment".to_string(),
            ));
        }
        if assignment.is_assigned {
            return Err(MarketError::Conflict(
                "Assigned work can no longer be deleted.".to_string(),
            ));
        }
        self.store
            .delete_open_assignment(assignment_id, actor.id)
            .await?;
        info!(%assignment_id, "Assignment deleted");
        Ok(())
    }

    /// The available-work board: every assignment nobody holds yet.
    pub async fn available_work(&self) -> MarketResult<Vec<AssignmentListing>> {
        Ok(self.store.list_open_assignments().await?)
    }

    pub async fn my_assignments(&self, actor: &Principal) -> MarketResult<Vec<Assignment>> {
        Ok(self.store.list_assignments_by_owner(actor.id).await?)
    }

    pub async fn subscribe_available_work(&self) -> MarketResult<ChangeStream> {
        Ok(self.store.subscribe(Topic::OpenAssignments).await?)
    }
}
