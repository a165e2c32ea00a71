//! The notification inbox: listing and consuming entries.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::requests::RequestService;
use crate::domain::{ChatSession, Notification, NotificationInbox, Principal};
use crate::error::{MarketError, MarketResult};
use crate::ports::{ChangeStream, MarketStore, Topic};

#[derive(Clone)]
pub struct InboxService {
    store: Arc<dyn MarketStore>,
    requests: RequestService,
}

impl InboxService {
    pub fn new(store: Arc<dyn MarketStore>, requests: RequestService) -> Self {
        Self { store, requests }
    }

    pub async fn inbox(&self, actor: &Principal) -> MarketResult<NotificationInbox> {
        Ok(self.store.get_inbox(actor.id).await?)
    }

    /// Accepts the request behind a notification; the notification is consumed with it.
    pub async fn accept(&self, actor: &Principal, notification_id: Uuid) -> MarketResult<ChatSession> {
        let request_id = self.request_behind(actor, notification_id).await?;
        self.requests.accept_request(actor, request_id).await
    }

    pub async fn reject(&self, actor: &Principal, notification_id: Uuid) -> MarketResult<()> {
        let request_id = self.request_behind(actor, notification_id).await?;
        self.requests.reject_request(actor, request_id).await
    }

    /// Consumes a notification and returns the chat it points at, if any.
    pub async fn open(&self, actor: &Principal, notification_id: Uuid) -> MarketResult<Option<String>> {
        let removed: Notification = self
            .store
            .remove_notification(actor.id, notification_id)
            .await?;
        info!(user_id = %actor.id, %notification_id, "Notification consumed");
        Ok(removed.chat_id)
    }

    pub async fn subscribe(&self, actor: &Principal) -> MarketResult<ChangeStream> {
        Ok(self.store.subscribe(Topic::Inbox(actor.id)).await?)
    }

    async fn request_behind(&self, actor: &Principal, notification_id: Uuid) -> MarketResult<Uuid> {
        let inbox = self.store.get_inbox(actor.id).await?;
        let notification = inbox.find(notification_id).ok_or_else(|| {
            MarketError::NotFound(format!("Notification {} not found", notification_id))
        })?;
        if !notification.is_actionable() {
            return Err(MarketError::Validation(
                "This notification has nothing to accept or reject.".to_string(),
            ));
        }
        notification
            .request_id
            .ok_or_else(|| MarketError::Validation("Notification has no request.".to_string()))
    }
}
