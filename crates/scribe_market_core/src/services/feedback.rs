//! Feedback and rating aggregation on chat close.

use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::notices;
use crate::domain::{ChatPhase, Notification, Principal, Review, WriterProfile, MAX_RATING, MIN_RATING};
use crate::error::{MarketError, MarketResult};
use crate::ports::{Clock, Delivery, MarketStore, SessionClosure};

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FeedbackInput {
    pub rating: Option<u8>,
    #[serde(default)]
    pub comment: String,
    pub task_completed: bool,
}

#[derive(Clone)]
pub struct FeedbackService {
    store: Arc<dyn MarketStore>,
    clock: Arc<dyn Clock>,
}

impl FeedbackService {
    pub fn new(store: Arc<dyn MarketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records the owner's review, folds it into the writer's rating and
    /// deletes the chat together with its assignment.
    pub async fn submit_feedback(
        &self,
        actor: &Principal,
        chat_id: &str,
        input: FeedbackInput,
    ) -> MarketResult<WriterProfile> {
        let rating = match input.rating {
            Some(r) if (MIN_RATING..=MAX_RATING).contains(&r) => r,
            Some(_) => {
                return Err(MarketError::Validation(format!(
                    "Rating must be between {} and {}.",
                    MIN_RATING, MAX_RATING
                )))
            }
            None => return Err(MarketError::Validation("A rating is required.".to_string())),
        };
        let comment = input.comment.trim();
        if comment.is_empty() {
            return Err(MarketError::Validation("A review comment is required.".to_string()));
        }

        let chat = self.store.get_chat(chat_id).await?;
        if actor.id != chat.owner_id {
            return Err(MarketError::Authorization(
                "Only the assignment owner can leave feedback".to_string(),
            ));
        }
        if chat.phase() != ChatPhase::AwaitingFeedback {
            return Err(MarketError::Conflict(
                "Both participants must end the chat before feedback.".to_string(),
            ));
        }
        let assignment = self.store.get_assignment(chat.assignment_id).await?;

        let now = self.clock.now();
        let closure = SessionClosure {
            chat_id: chat.id.clone(),
            assignment_id: chat.assignment_id,
            writer_id: chat.writer_id,
            review: Review {
                id: Uuid::new_v4(),
                writer_id: chat.writer_id,
                reviewer_id: actor.id,
                assignment_id: Some(chat.assignment_id),
                rating,
                comment: comment.to_string(),
                task_completed: input.task_completed,
                created_at: now,
            },
            notices: vec![Delivery {
                recipient: chat.writer_id,
                notification: Notification::new(
                    notices::review_received(assignment.display_title(), rating),
                    now,
                ),
            }],
        };

        let profile = self.store.close_session(&closure).await?;
        info!(
            chat_id = %chat.id,
            writer_id = %chat.writer_id,
            rating,
            new_average = profile.rating,
            "Session closed with feedback"
        );
        Ok(profile)
    }
}
