//! Request fan-out: writer-to-task and user-to-writer requests and the
//! accept / reject / expire transitions they share.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::assignments::{draft_assignment, NewAssignment};
use super::{notices, MarketPolicy};
use crate::domain::{
    Assignment, ChatSession, Notification, Principal, Request, RequestKind, RequestStatus,
};
use crate::error::{MarketError, MarketResult};
use crate::ports::{
    AcceptedRequest, Clock, Delivery, Handover, MarketStore, PortError, Rejection, RequestDraft,
};

/// What a user fills in when requesting a specific writer.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Proposal {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub pages: u32,
    pub deadline: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RequestService {
    store: Arc<dyn MarketStore>,
    clock: Arc<dyn Clock>,
    policy: MarketPolicy,
}

impl RequestService {
    pub fn new(store: Arc<dyn MarketStore>, clock: Arc<dyn Clock>, policy: MarketPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// A writer asks the owner of an open assignment for the work.
    pub async fn request_assignment(
        &self,
        writer: &Principal,
        assignment_id: Uuid,
    ) -> MarketResult<Request> {
        let record = self.store.get_user(writer.id).await.map_err(|e| match e {
            PortError::NotFound(_) => {
                MarketError::Authorization("Only writers can request assignments".to_string())
            }
            other => other.into(),
        })?;
        if !record.is_writer {
            return Err(MarketError::Authorization(
                "Only writers can request assignments".to_string(),
            ));
        }

        let assignment = self.store.get_assignment(assignment_id).await?;
        if assignment.owner_id == writer.id {
            return Err(MarketError::Validation(
                "You cannot request your own assignment.".to_string(),
            ));
        }
        if assignment.is_assigned {
            return Err(MarketError::Conflict(
                "This task has already been assigned.".to_string(),
            ));
        }

        let now = self.clock.now();
        let request = Request::pending(
            RequestKind::WriterToTask,
            writer.id,
            assignment.owner_id,
            &assignment,
            now,
            self.policy.request_ttl,
        );
        let draft = RequestDraft {
            notice: Delivery {
                recipient: assignment.owner_id,
                notification: Notification::new(
                    notices::writer_requested(&record.username, assignment.display_title()),
                    now,
                )
                .for_request(&request),
            },
            request: request.clone(),
            new_assignment: None,
            max_pending: None,
            max_active: None,
        };
        self.store.open_request(&draft).await?;
        info!(request_id = %request.id, %assignment_id, writer_id = %writer.id, "Writer requested assignment");
        Ok(request)
    }

    /// A user proposes a new task to an available writer. The assignment and
    /// the request are created together.
    pub async fn propose_task(
        &self,
        user: &Principal,
        writer_id: Uuid,
        proposal: Proposal,
    ) -> MarketResult<(Assignment, Request)> {
        if writer_id == user.id {
            return Err(MarketError::Validation(
                "You cannot request yourself.".to_string(),
            ));
        }
        let requester = self.store.get_user(user.id).await.map_err(|e| match e {
            PortError::NotFound(_) => MarketError::Validation(
                "Complete onboarding before requesting a writer.".to_string(),
            ),
            other => other.into(),
        })?;
        let writer = self.store.get_user(writer_id).await?;
        let profile = match (&writer.writer_profile, writer.is_available_writer()) {
            (Some(profile), true) => profile.clone(),
            _ => {
                return Err(MarketError::Validation(
                    "This writer is not taking work right now.".to_string(),
                ))
            }
        };
        if !profile.accepts_pages(proposal.pages) {
            return Err(MarketError::Validation(format!(
                "This writer accepts between {} and {} pages.",
                profile.min_pages, profile.max_pages
            )));
        }

        let now = self.clock.now();
        let assignment = draft_assignment(
            user.id,
            NewAssignment {
                title: proposal.title,
                description: proposal.description,
                pages: proposal.pages,
                rate_per_page: profile.price_per_page,
                deadline: proposal.deadline,
            },
            now,
        )?;
        let request = Request::pending(
            RequestKind::UserToWriter,
            user.id,
            writer_id,
            &assignment,
            now,
            self.policy.request_ttl,
        );
        let draft = RequestDraft {
            notice: Delivery {
                recipient: writer_id,
                notification: Notification::new(
                    notices::task_proposed(
                        &requester.username,
                        assignment.display_title(),
                        assignment.pages,
                        assignment.total_price(),
                    ),
                    now,
                )
                .for_request(&request),
            },
            request: request.clone(),
            new_assignment: Some(assignment.clone()),
            max_pending: Some(self.policy.max_pending_requests),
            max_active: Some(self.policy.max_active_assignments),
        };
        self.store.open_request(&draft).await?;
        info!(request_id = %request.id, writer_id = %writer_id, user_id = %user.id, "Task proposed to writer");
        Ok((assignment, request))
    }

    /// Accepts a pending request: assigns the work, opens the chat and notifies both sides.
    ///
    /// Accepting an already accepted request returns the chat it opened.
    pub async fn accept_request(
        &self,
        actor: &Principal,
        request_id: Uuid,
    ) -> MarketResult<ChatSession> {
        let request = self.store.get_request(request_id).await?;
        if request.target_id != actor.id {
            return Err(MarketError::Authorization(
                "Only the recipient can accept this request".to_string(),
            ));
        }
        match request.status {
            RequestStatus::Pending => {}
            RequestStatus::Accepted => {
                let chat_id = ChatSession::id_for(request.assignment_id, request.resolved_writer());
                return Ok(self.store.get_chat(&chat_id).await?);
            }
            RequestStatus::Rejected => {
                return Err(MarketError::Conflict(
                    "This request was already rejected.".to_string(),
                ))
            }
        }
        let now = self.clock.now();
        if request.is_expired(now) {
            warn!(%request_id, "Refused acceptance of expired request");
            return Err(MarketError::Expired(request_id));
        }

        let assignment = self.store.get_assignment(request.assignment_id).await?;
        if assignment.is_assigned {
            return Err(MarketError::Conflict(
                "This task has already been accepted by another writer.".to_string(),
            ));
        }

        let writer_id = request.resolved_writer();
        let writer_name = self.username_of(writer_id).await;
        let chat = ChatSession::open(&assignment, writer_id, now);
        let title = assignment.display_title();
        let handover = Handover {
            assignment_id: assignment.id,
            writer_id,
            chat: chat.clone(),
            accepted_request: Some(AcceptedRequest {
                request_id,
                recipient: actor.id,
            }),
            notices: vec![
                Delivery {
                    recipient: assignment.owner_id,
                    notification: Notification::new(
                        notices::assigned_to_owner(title, &writer_name),
                        now,
                    )
                    .for_chat(&chat),
                },
                Delivery {
                    recipient: writer_id,
                    notification: Notification::new(notices::assigned_to_writer(title), now)
                        .for_chat(&chat),
                },
            ],
        };

        let chat = match self.store.hand_over(&handover).await {
            Ok(chat) => chat,
            Err(PortError::Conflict(what)) => {
                // A duplicate accept may have won the race; hand back the chat it opened.
                if let Ok(current) = self.store.get_request(request_id).await {
                    if current.status == RequestStatus::Accepted {
                        return Ok(self.store.get_chat(&handover.chat.id).await?);
                    }
                }
                return Err(MarketError::Conflict(what));
            }
            Err(e) => return Err(e.into()),
        };
        info!(%request_id, chat_id = %chat.id, %writer_id, "Request accepted");
        Ok(chat)
    }

    /// Rejects a pending request. The assignment is left untouched.
    pub async fn reject_request(&self, actor: &Principal, request_id: Uuid) -> MarketResult<()> {
        let request = self.store.get_request(request_id).await?;
        if request.target_id != actor.id {
            return Err(MarketError::Authorization(
                "Only the recipient can reject this request".to_string(),
            ));
        }
        if request.status != RequestStatus::Pending {
            return Err(MarketError::Conflict(
                "This request has already been answered.".to_string(),
            ));
        }
        let title = match self.store.get_assignment(request.assignment_id).await {
            Ok(a) => a.display_title().to_string(),
            Err(_) => crate::domain::UNTITLED_ASSIGNMENT.to_string(),
        };
        let rejection = Rejection {
            request_id,
            recipient: actor.id,
            notices: vec![Delivery {
                recipient: request.requester_id,
                notification: Notification::new(
                    notices::request_rejected(&title),
                    self.clock.now(),
                ),
            }],
        };
        self.store.reject_request(&rejection).await?;
        info!(%request_id, "Request rejected");
        Ok(())
    }

    /// Removes every pending request past its expiry and tells the requesters.
    pub async fn purge_expired(&self) -> MarketResult<Vec<Request>> {
        let now = self.clock.now();
        let expired = self.store.purge_expired_requests(now).await?;
        for request in &expired {
            let title = match self.store.get_assignment(request.assignment_id).await {
                Ok(a) => a.display_title().to_string(),
                Err(_) => crate::domain::UNTITLED_ASSIGNMENT.to_string(),
            };
            let delivery = Delivery {
                recipient: request.requester_id,
                notification: Notification::new(notices::request_expired(&title), now),
            };
            if let Err(e) = self.store.push_notification(&delivery).await {
                warn!(request_id = %request.id, "Failed to send expiry notice: {:?}", e);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Purged expired requests");
        }
        Ok(expired)
    }

    async fn username_of(&self, user_id: Uuid) -> String {
        match self.store.get_user(user_id).await {
            Ok(user) => user.username,
            Err(e) => {
                warn!(%user_id, "Could not resolve username: {:?}", e);
                "a writer".to_string()
            }
        }
    }
}
