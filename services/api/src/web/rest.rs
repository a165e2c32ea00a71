//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Handlers stay thin: they pull the authenticated `Principal` out of the
//! request extensions, call one workflow service and serialise the result.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use scribe_market_core::domain::{
    Assignment, AssignmentListing, AssignmentStatus, ChatMessage, ChatPhase, ChatSession,
    ChatSummary, Countdown, Notification, NotificationInbox, Principal, Request, RequestKind,
    RequestStatus, Review, UserRecord, WriterProfile,
};
use scribe_market_core::services::{
    BecomeWriter, FeedbackInput, NewAssignment, ProfileUpdate, Proposal,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::{ApiResult, ErrorBody, ErrorResponse};
use crate::web::auth::{self, AuthResponse, LoginRequest, SignupRequest};
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        me_handler,
        onboarding_handler,
        public_profile_handler,
        list_writers_handler,
        become_writer_handler,
        update_writer_handler,
        propose_task_handler,
        post_assignment_handler,
        available_work_handler,
        my_assignments_handler,
        claim_assignment_handler,
        request_assignment_handler,
        finish_assignment_handler,
        delete_assignment_handler,
        inbox_handler,
        accept_notification_handler,
        reject_notification_handler,
        open_notification_handler,
        list_chats_handler,
        get_chat_handler,
        send_message_handler,
        typing_handler,
        end_chat_handler,
        mark_read_handler,
        countdown_handler,
        feedback_handler,
    ),
    components(
        schemas(
            SignupRequest, LoginRequest, AuthResponse, ErrorResponse, ErrorBody,
            MeResponse, OnboardingRequest, ProposalResponse, OpenNotificationResponse,
            SendMessageRequest, TypingRequest,
            Principal, UserRecord, WriterProfile, Review, Assignment, AssignmentStatus,
            AssignmentListing, Request, RequestKind, RequestStatus, Notification,
            NotificationInbox, ChatSession, ChatMessage, ChatPhase, ChatSummary, Countdown,
            NewAssignment, Proposal, FeedbackInput, BecomeWriter, ProfileUpdate,
        )
    ),
    tags(
        (name = "auth", description = "Sign-up, sign-in and sign-out."),
        (name = "users", description = "Onboarding and public profiles."),
        (name = "writers", description = "Writer profiles and task proposals."),
        (name = "assignments", description = "Posting, claiming and finishing work."),
        (name = "notifications", description = "The inbox and request decisions."),
        (name = "chats", description = "Assignment chats and feedback.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The signed-in identity and, once onboarded, the marketplace record.
#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub principal: Principal,
    pub user: Option<UserRecord>,
}

#[derive(Deserialize, ToSchema)]
pub struct OnboardingRequest {
    pub username: String,
}

#[derive(Serialize, ToSchema)]
pub struct ProposalResponse {
    pub assignment: Assignment,
    pub request: Request,
}

#[derive(Serialize, ToSchema)]
pub struct OpenNotificationResponse {
    /// The chat the notification pointed at, if any.
    pub chat_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct TypingRequest {
    pub typing: bool,
}

//=========================================================================================
// Users
//=========================================================================================

/// The current principal and their marketplace record.
#[utoipa::path(
    get,
    path = "/me",
    tag = "users",
    responses(
        (status = 200, description = "Signed-in user", body = MeResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<MeResponse>> {
    let user = state.market.users.me(&principal).await?;
    Ok(Json(MeResponse { principal, user }))
}

/// Pick a username and create the marketplace record.
#[utoipa::path(
    post,
    path = "/onboarding",
    tag = "users",
    request_body = OnboardingRequest,
    responses(
        (status = 201, description = "User onboarded", body = UserRecord),
        (status = 400, description = "Username not acceptable", body = ErrorResponse),
        (status = 409, description = "Username taken or already onboarded", body = ErrorResponse)
    )
)]
pub async fn onboarding_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<OnboardingRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.market.users.onboard(&principal, &req.username).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// A user's public profile, looked up by username.
#[utoipa::path(
    get,
    path = "/users/{username}",
    tag = "users",
    params(("username" = String, Path, description = "Username, case-insensitive")),
    responses(
        (status = 200, description = "Public profile", body = UserRecord),
        (status = 404, description = "No such user", body = ErrorResponse)
    )
)]
pub async fn public_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> ApiResult<Json<UserRecord>> {
    Ok(Json(state.market.users.public_profile(&username).await?))
}

//=========================================================================================
// Writers
//=========================================================================================

/// Writers currently taking work.
#[utoipa::path(
    get,
    path = "/writers",
    tag = "writers",
    responses((status = 200, description = "Available writers", body = Vec<UserRecord>))
)]
pub async fn list_writers_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<UserRecord>>> {
    Ok(Json(state.market.writers.list_available_writers().await?))
}

/// Become a writer.
#[utoipa::path(
    post,
    path = "/writers/me",
    tag = "writers",
    request_body = BecomeWriter,
    responses(
        (status = 201, description = "Writer profile created", body = UserRecord),
        (status = 400, description = "Invalid terms", body = ErrorResponse),
        (status = 409, description = "Already a writer", body = ErrorResponse)
    )
)]
pub async fn become_writer_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(input): Json<BecomeWriter>,
) -> ApiResult<impl IntoResponse> {
    let user = state.market.writers.become_writer(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Update writer terms or availability.
#[utoipa::path(
    patch,
    path = "/writers/me",
    tag = "writers",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Writer profile updated", body = UserRecord),
        (status = 400, description = "Invalid terms", body = ErrorResponse),
        (status = 403, description = "Not a writer", body = ErrorResponse)
    )
)]
pub async fn update_writer_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<UserRecord>> {
    Ok(Json(
        state.market.writers.update_profile(&principal, update).await?,
    ))
}

/// Propose a new task directly to a writer.
#[utoipa::path(
    post,
    path = "/writers/{id}/requests",
    tag = "writers",
    params(("id" = Uuid, Path, description = "The writer's user id")),
    request_body = Proposal,
    responses(
        (status = 201, description = "Assignment and request created", body = ProposalResponse),
        (status = 400, description = "Invalid proposal or pending cap reached", body = ErrorResponse),
        (status = 404, description = "No such writer", body = ErrorResponse)
    )
)]
pub async fn propose_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(writer_id): Path<Uuid>,
    Json(proposal): Json<Proposal>,
) -> ApiResult<impl IntoResponse> {
    let (assignment, request) = state
        .market
        .requests
        .propose_task(&principal, writer_id, proposal)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ProposalResponse {
            assignment,
            request,
        }),
    ))
}

//=========================================================================================
// Assignments
//=========================================================================================

/// Post a new assignment.
#[utoipa::path(
    post,
    path = "/assignments",
    tag = "assignments",
    request_body = NewAssignment,
    responses(
        (status = 201, description = "Assignment posted", body = Assignment),
        (status = 400, description = "Invalid assignment or active quota reached", body = ErrorResponse)
    )
)]
pub async fn post_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(input): Json<NewAssignment>,
) -> ApiResult<impl IntoResponse> {
    let assignment = state
        .market
        .assignments
        .post_assignment(&principal, input)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// Unassigned work, oldest first.
#[utoipa::path(
    get,
    path = "/assignments",
    tag = "assignments",
    responses((status = 200, description = "Open assignments", body = Vec<AssignmentListing>))
)]
pub async fn available_work_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<AssignmentListing>>> {
    Ok(Json(state.market.assignments.available_work().await?))
}

/// Assignments posted by the caller.
#[utoipa::path(
    get,
    path = "/assignments/mine",
    tag = "assignments",
    responses((status = 200, description = "Own assignments", body = Vec<Assignment>))
)]
pub async fn my_assignments_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<Assignment>>> {
    Ok(Json(state.market.assignments.my_assignments(&principal).await?))
}

/// Take an unassigned assignment directly.
#[utoipa::path(
    post,
    path = "/assignments/{id}/claim",
    tag = "assignments",
    params(("id" = Uuid, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Assigned; the new chat", body = ChatSession),
        (status = 403, description = "Caller is not a writer", body = ErrorResponse),
        (status = 409, description = "Already assigned", body = ErrorResponse)
    )
)]
pub async fn claim_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(
        state
            .market
            .assignments
            .claim_assignment(&principal, assignment_id)
            .await?,
    ))
}

/// Ask the owner for an assignment.
#[utoipa::path(
    post,
    path = "/assignments/{id}/requests",
    tag = "assignments",
    params(("id" = Uuid, Path, description = "Assignment id")),
    responses(
        (status = 201, description = "Request sent to the owner", body = Request),
        (status = 403, description = "Own assignment or not a writer", body = ErrorResponse),
        (status = 409, description = "Already requested or assigned", body = ErrorResponse)
    )
)]
pub async fn request_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let request = state
        .market
        .requests
        .request_assignment(&principal, assignment_id)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Finish an assigned assignment with a rating.
#[utoipa::path(
    post,
    path = "/assignments/{id}/finish",
    tag = "assignments",
    params(("id" = Uuid, Path, description = "Assignment id")),
    request_body = FeedbackInput,
    responses(
        (status = 200, description = "Finished; the writer's updated profile", body = WriterProfile),
        (status = 400, description = "Rating or comment missing", body = ErrorResponse),
        (status = 409, description = "Not assigned or chat still active", body = ErrorResponse)
    )
)]
pub async fn finish_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(assignment_id): Path<Uuid>,
    Json(input): Json<FeedbackInput>,
) -> ApiResult<Json<WriterProfile>> {
    Ok(Json(
        state
            .market
            .assignments
            .finish_assignment(&principal, assignment_id, input)
            .await?,
    ))
}

/// Delete an assignment nobody has taken yet.
#[utoipa::path(
    delete,
    path = "/assignments/{id}",
    tag = "assignments",
    params(("id" = Uuid, Path, description = "Assignment id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 409, description = "Already assigned", body = ErrorResponse)
    )
)]
pub async fn delete_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(assignment_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .market
        .assignments
        .delete_assignment(&principal, assignment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Notifications
//=========================================================================================

#[utoipa::path(
    get,
    path = "/notifications",
    tag = "notifications",
    responses((status = 200, description = "The caller's inbox", body = NotificationInbox))
)]
pub async fn inbox_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<NotificationInbox>> {
    Ok(Json(state.market.inbox.inbox(&principal).await?))
}

/// Accept the request behind a notification.
#[utoipa::path(
    post,
    path = "/notifications/{id}/accept",
    tag = "notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Accepted; the new chat", body = ChatSession),
        (status = 409, description = "Assignment already taken", body = ErrorResponse),
        (status = 410, description = "Request expired", body = ErrorResponse)
    )
)]
pub async fn accept_notification_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(
        state
            .market
            .inbox
            .accept(&principal, notification_id)
            .await?,
    ))
}

/// Decline the request behind a notification.
#[utoipa::path(
    post,
    path = "/notifications/{id}/reject",
    tag = "notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 204, description = "Rejected"),
        (status = 404, description = "No such notification", body = ErrorResponse)
    )
)]
pub async fn reject_notification_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .market
        .inbox
        .reject(&principal, notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Consume a notification, returning the chat it points at.
#[utoipa::path(
    post,
    path = "/notifications/{id}/open",
    tag = "notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Consumed", body = OpenNotificationResponse),
        (status = 404, description = "No such notification", body = ErrorResponse)
    )
)]
pub async fn open_notification_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<Json<OpenNotificationResponse>> {
    let chat_id = state
        .market
        .inbox
        .open(&principal, notification_id)
        .await?;
    Ok(Json(OpenNotificationResponse { chat_id }))
}

//=========================================================================================
// Chats
//=========================================================================================

#[utoipa::path(
    get,
    path = "/chats",
    tag = "chats",
    responses((status = 200, description = "Chats the caller takes part in", body = Vec<ChatSummary>))
)]
pub async fn list_chats_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<ChatSummary>>> {
    Ok(Json(state.market.chats.list_chats(&principal).await?))
}

#[utoipa::path(
    get,
    path = "/chats/{id}",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "The chat session", body = ChatSession),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "No such chat", body = ErrorResponse)
    )
)]
pub async fn get_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(state.market.chats.session(&principal, &chat_id).await?))
}

/// Send a message; blank text is ignored.
#[utoipa::path(
    post,
    path = "/chats/{id}/messages",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Message appended", body = ChatSession),
        (status = 204, description = "Blank message ignored"),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Response> {
    let sent = state
        .market
        .chats
        .send_message(Some(&principal), &chat_id, &req.text)
        .await?;
    Ok(match sent {
        Some(chat) => Json(chat).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[utoipa::path(
    post,
    path = "/chats/{id}/typing",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    request_body = TypingRequest,
    responses(
        (status = 200, description = "Typing indicator updated", body = ChatSession),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn typing_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
    Json(req): Json<TypingRequest>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(
        state
            .market
            .chats
            .set_typing(&principal, &chat_id, req.typing)
            .await?,
    ))
}

/// Toggle the caller's end-chat flag.
#[utoipa::path(
    post,
    path = "/chats/{id}/end",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Flag toggled", body = ChatSession),
        (status = 409, description = "Already awaiting feedback", body = ErrorResponse)
    )
)]
pub async fn end_chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(
        state
            .market
            .chats
            .toggle_end_chat(&principal, &chat_id)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/chats/{id}/read",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Partner's messages marked read", body = ChatSession),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ChatSession>> {
    Ok(Json(state.market.chats.mark_read(&principal, &chat_id).await?))
}

/// Time left until the assignment deadline.
#[utoipa::path(
    get,
    path = "/chats/{id}/countdown",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Deadline countdown", body = Countdown),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn countdown_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Countdown>> {
    Ok(Json(
        state
            .market
            .chats
            .deadline_countdown(&principal, &chat_id)
            .await?,
    ))
}

/// Rate the writer and close the session.
#[utoipa::path(
    post,
    path = "/chats/{id}/feedback",
    tag = "chats",
    params(("id" = String, Path, description = "Chat id")),
    request_body = FeedbackInput,
    responses(
        (status = 200, description = "Session closed; the writer's updated profile", body = WriterProfile),
        (status = 400, description = "Rating or comment missing", body = ErrorResponse),
        (status = 403, description = "Only the owner can leave feedback", body = ErrorResponse),
        (status = 409, description = "Chat not yet ended by both", body = ErrorResponse)
    )
)]
pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<String>,
    Json(input): Json<FeedbackInput>,
) -> ApiResult<Json<WriterProfile>> {
    Ok(Json(
        state
            .market
            .feedback
            .submit_feedback(&principal, &chat_id, input)
            .await?,
    ))
}
