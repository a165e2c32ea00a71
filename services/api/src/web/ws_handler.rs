//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each subscription runs as its own spawned task holding a child of the
//! connection's cancellation token, so unsubscribing cancels one task and a
//! disconnect cancels them all. Signing out the connection's session closes it.

use crate::web::{
    middleware::session_token,
    protocol::{ClientMessage, ServerMessage, TopicSpec},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use scribe_market_core::domain::{Principal, PrincipalChange};
use scribe_market_core::ports::{Change, ChangeStream, PrincipalStream};
use scribe_market_core::services::chat::view_for;
use scribe_market_core::MarketResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
) -> Response {
    let session = session_token(&headers).unwrap_or_default().to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, principal, session))
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    principal: Principal,
    session: String,
) {
    info!("New WebSocket connection established for user: {}", principal.id);

    // The sender is shared by every subscription task.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    let connection = CancellationToken::new();
    let mut subscriptions: HashMap<TopicSpec, CancellationToken> = HashMap::new();
    let mut principal_changes = match app_state.identity.subscribe_principal_changes().await {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Sign-out events unavailable for this connection: {}", e);
            None
        }
    };

    loop {
        let msg = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(msg)) => msg,
                _ => break,
            },
            Some(change) = next_change(&mut principal_changes) => {
                if signs_out(&change, principal.id) && !session_alive(&app_state, &session).await {
                    info!("Session signed out; closing WebSocket for user: {}", principal.id);
                    send(
                        &ws_sender,
                        &ServerMessage::Error {
                            message: "Signed out".to_string(),
                        },
                    )
                    .await;
                    let _ = ws_sender.lock().await.send(Message::Close(None)).await;
                    break;
                }
                continue;
            }
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Subscribe { topic }) => {
                    // Refused or finished subscriptions cancel themselves.
                    subscriptions.retain(|_, token| !token.is_cancelled());
                    if subscriptions.contains_key(&topic) {
                        continue;
                    }
                    let token = connection.child_token();
                    subscriptions.insert(topic.clone(), token.clone());
                    tokio::spawn(run_subscription(
                        app_state.clone(),
                        principal.clone(),
                        topic,
                        ws_sender.clone(),
                        token,
                    ));
                }
                Ok(ClientMessage::Unsubscribe { topic }) => {
                    if let Some(token) = subscriptions.remove(&topic) {
                        token.cancel();
                    }
                    send(&ws_sender, &ServerMessage::Unsubscribed { topic }).await;
                }
                Err(e) => {
                    warn!("Failed to deserialize client message: {}", e);
                    send(
                        &ws_sender,
                        &ServerMessage::Error {
                            message: format!("Unrecognised message: {}", e),
                        },
                    )
                    .await;
                }
            },
            Message::Close(_) => {
                info!("Client sent close message.");
                break;
            }
            _ => {}
        }
    }

    // --- Cleanup ---
    connection.cancel();
    info!("WebSocket connection closed for user: {}", principal.id);
}

/// Pends forever when the connection has no sign-out feed.
async fn next_change(
    changes: &mut Option<PrincipalStream>,
) -> Option<PrincipalChange> {
    match changes {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn signs_out(change: &PrincipalChange, user_id: Uuid) -> bool {
    matches!(change, PrincipalChange::SignedOut { user_id: id } if *id == user_id)
}

/// The user may hold several sessions; only this connection's one matters.
async fn session_alive(app_state: &AppState, token: &str) -> bool {
    match app_state.identity.current_principal(token).await {
        Ok(found) => found.is_some(),
        Err(e) => {
            warn!("Could not re-check session after sign-out: {}", e);
            true
        }
    }
}

/// Pushes the current state of `topic`, then every change to it, until cancelled.
async fn run_subscription(
    app_state: Arc<AppState>,
    principal: Principal,
    topic: TopicSpec,
    ws_sender: WsSender,
    token: CancellationToken,
) {
    let (initial, mut changes) = match open_topic(&app_state, &principal, &topic).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!(user_id = %principal.id, ?topic, "Subscription refused: {}", e);
            send(&ws_sender, &ServerMessage::Error { message: e.to_string() }).await;
            token.cancel();
            return;
        }
    };

    let subscribed = ServerMessage::Subscribed {
        topic: topic.clone(),
    };
    if !send(&ws_sender, &subscribed).await || !send(&ws_sender, &initial).await {
        token.cancel();
        return;
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = changes.next() => {
                let Some(change) = next else { break };
                let message = to_message(change, principal.id);
                let closed = matches!(message, ServerMessage::ChatClosed { .. });
                if !send(&ws_sender, &message).await || closed {
                    break;
                }
            }
        }
    }
    token.cancel();
}

/// Subscribes before loading the snapshot so no change falls in between.
async fn open_topic(
    app_state: &AppState,
    principal: &Principal,
    topic: &TopicSpec,
) -> MarketResult<(ServerMessage, ChangeStream)> {
    let market = &app_state.market;
    Ok(match topic {
        TopicSpec::Inbox => {
            let stream = market.inbox.subscribe(principal).await?;
            let inbox = market.inbox.inbox(principal).await?;
            (ServerMessage::Inbox { inbox }, stream)
        }
        TopicSpec::Chat { chat_id } => {
            let stream = market.chats.subscribe(principal, chat_id).await?;
            let chat = market.chats.session(principal, chat_id).await?;
            (ServerMessage::Chat { chat }, stream)
        }
        TopicSpec::OpenAssignments => {
            let stream = market.assignments.subscribe_available_work().await?;
            let assignments = market.assignments.available_work().await?;
            (ServerMessage::OpenAssignments { assignments }, stream)
        }
    })
}

fn to_message(change: Change, viewer: Uuid) -> ServerMessage {
    match change {
        Change::Inbox(inbox) => ServerMessage::Inbox { inbox },
        Change::Chat(chat) => ServerMessage::Chat {
            chat: view_for(chat, viewer),
        },
        Change::ChatClosed(chat_id) => ServerMessage::ChatClosed { chat_id },
        Change::OpenAssignments(assignments) => ServerMessage::OpenAssignments { assignments },
    }
}

/// Returns `false` once the socket is gone.
async fn send(ws_sender: &WsSender, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {:?}", e);
            return false;
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_own_sign_out_counts() {
        let me = Uuid::new_v4();
        assert!(signs_out(&PrincipalChange::SignedOut { user_id: me }, me));
        assert!(!signs_out(
            &PrincipalChange::SignedOut {
                user_id: Uuid::new_v4()
            },
            me
        ));
        let principal = Principal {
            id: me,
            display_name: "me".to_string(),
            email: "me@example.edu".to_string(),
            avatar_url: None,
        };
        assert!(!signs_out(&PrincipalChange::SignedIn { principal }, me));
    }
}
