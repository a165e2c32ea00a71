//! Chat sessions: messages, typing indicator, the end-of-chat handshake and
//! the deadline countdown.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::notices;
use crate::domain::{
    ChatMessage, ChatPhase, ChatSession, ChatSummary, Countdown, Notification, Participant,
    Principal,
};
use crate::error::{MarketError, MarketResult};
use crate::ports::{ChangeStream, Clock, Delivery, MarketStore, Topic};

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn MarketStore>,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(store: Arc<dyn MarketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The session as one participant sees it: their own typing state is hidden.
    pub async fn session(&self, actor: &Principal, chat_id: &str) -> MarketResult<ChatSession> {
        let chat = self.participant_chat(actor, chat_id).await?.0;
        Ok(view_for(chat, actor.id))
    }

    /// Every chat the user takes part in, with titles, partner names and unread counts.
    pub async fn list_chats(&self, actor: &Principal) -> MarketResult<Vec<ChatSummary>> {
        let chats = self.store.list_chats_for(actor.id).await?;
        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            let partner_id = if chat.owner_id == actor.id {
                chat.writer_id
            } else {
                chat.owner_id
            };
            let assignment_title = match self.store.get_assignment(chat.assignment_id).await {
                Ok(a) => a.display_title().to_string(),
                Err(_) => "Unknown Assignment".to_string(),
            };
            let partner_name = match self.store.get_user(partner_id).await {
                Ok(u) => u.username,
                Err(_) => "Unknown User".to_string(),
            };
            summaries.push(ChatSummary {
                chat_id: chat.id.clone(),
                assignment_id: chat.assignment_id,
                assignment_title,
                partner_id,
                partner_name,
                unread: chat.unread_for(actor.id),
                phase: chat.phase(),
            });
        }
        Ok(summaries)
    }

    /// Appends a message. Blank text or a missing sender is silently ignored.
    pub async fn send_message(
        &self,
        sender: Option<&Principal>,
        chat_id: &str,
        text: &str,
    ) -> MarketResult<Option<ChatSession>> {
        let sender = match sender {
            Some(sender) => sender,
            None => return Ok(None),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        self.participant_chat(sender, chat_id).await?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: sender.id,
            sender_name: if sender.display_name.is_empty() {
                "Anonymous".to_string()
            } else {
                sender.display_name.clone()
            },
            text: text.to_string(),
            read: false,
            created_at: self.clock.now(),
        };
        let chat = self.store.append_message(chat_id, &message).await?;
        Ok(Some(view_for(chat, sender.id)))
    }

    /// Last writer wins; stopping only clears the indicator if the caller holds it.
    pub async fn set_typing(
        &self,
        actor: &Principal,
        chat_id: &str,
        typing: bool,
    ) -> MarketResult<ChatSession> {
        let chat = self.participant_chat(actor, chat_id).await?.0;
        let chat = if typing {
            self.store.set_typing(chat_id, Some(actor.id)).await?
        } else if chat.typing == Some(actor.id) {
            self.store.set_typing(chat_id, None).await?
        } else {
            chat
        };
        Ok(view_for(chat, actor.id))
    }

    /// Flips the caller's end-chat flag. Undo is allowed until the other side ends too.
    pub async fn toggle_end_chat(&self, actor: &Principal, chat_id: &str) -> MarketResult<ChatSession> {
        let who = self.participant_chat(actor, chat_id).await?.1;
        let chat = self.store.toggle_end_chat(chat_id, who).await?;
        info!(
            %chat_id,
            user_id = %actor.id,
            ended = chat.has_ended(who),
            phase = ?chat.phase(),
            "End-chat toggled"
        );
        Ok(view_for(chat, actor.id))
    }

    pub async fn mark_read(&self, actor: &Principal, chat_id: &str) -> MarketResult<ChatSession> {
        self.participant_chat(actor, chat_id).await?;
        let chat = self.store.mark_chat_read(chat_id, actor.id).await?;
        Ok(view_for(chat, actor.id))
    }

    /// Time left until the assignment deadline. Once it has passed the session
    /// is forced into the feedback phase.
    pub async fn deadline_countdown(&self, actor: &Principal, chat_id: &str) -> MarketResult<Countdown> {
        let chat = self.participant_chat(actor, chat_id).await?.0;
        let assignment = self.store.get_assignment(chat.assignment_id).await?;
        let now = self.clock.now();

        let mut phase = chat.phase();
        if now >= assignment.deadline && phase == ChatPhase::Active {
            phase = self.store.force_end_chat(chat_id).await?.phase();
            info!(%chat_id, "Deadline passed; chat forced to feedback");
        }
        Ok(Countdown::until(assignment.deadline, now, phase))
    }

    /// Forces every overdue chat into the feedback phase; returns the affected ids.
    pub async fn enforce_deadlines(&self) -> MarketResult<Vec<String>> {
        let now = self.clock.now();
        let overdue = self.store.list_overdue_chats(now).await?;
        let mut ended = Vec::with_capacity(overdue.len());
        for chat in overdue {
            if let Err(e) = self.store.force_end_chat(&chat.id).await {
                warn!(chat_id = %chat.id, "Failed to end overdue chat: {:?}", e);
                continue;
            }
            let title = match self.store.get_assignment(chat.assignment_id).await {
                Ok(a) => a.display_title().to_string(),
                Err(_) => crate::domain::UNTITLED_ASSIGNMENT.to_string(),
            };
            for recipient in [chat.owner_id, chat.writer_id] {
                let delivery = Delivery {
                    recipient,
                    notification: Notification::new(notices::deadline_passed(&title), now)
                        .for_chat(&chat),
                };
                if let Err(e) = self.store.push_notification(&delivery).await {
                    warn!(chat_id = %chat.id, "Failed to send deadline notice: {:?}", e);
                }
            }
            ended.push(chat.id);
        }
        if !ended.is_empty() {
            info!(count = ended.len(), "Overdue chats forced to feedback");
        }
        Ok(ended)
    }

    pub async fn subscribe(&self, actor: &Principal, chat_id: &str) -> MarketResult<ChangeStream> {
        self.participant_chat(actor, chat_id).await?;
        Ok(self.store.subscribe(Topic::Chat(chat_id.to_string())).await?)
    }

    async fn participant_chat(
        &self,
        actor: &Principal,
        chat_id: &str,
    ) -> MarketResult<(ChatSession, Participant)> {
        let chat = self.store.get_chat(chat_id).await?;
        match chat.participant(actor.id) {
            Some(who) => Ok((chat, who)),
            None => Err(MarketError::Authorization(
                "You are not a participant of this chat".to_string(),
            )),
        }
    }
}

/// Masks the typing indicator for its own holder.
pub fn view_for(mut chat: ChatSession, viewer: Uuid) -> ChatSession {
    chat.typing = chat.typing_visible_to(viewer);
    chat
}
