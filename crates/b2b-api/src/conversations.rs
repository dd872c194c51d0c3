use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use b2b_types::api::{ConversationListQuery, CreateConversationRequest, CreateConversationResponse};
use b2b_types::models::Caller;

use crate::error::MessagingError;
use crate::messaging::NewConversationParams;
use crate::state::AppState;

/// GET /conversations?archived=bool
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ConversationListQuery>,
) -> Result<impl IntoResponse, MessagingError> {
    let summaries = state
        .messenger
        .list_conversation_summaries(&caller, query.archived)
        .await?;
    Ok(Json(summaries))
}

/// POST /conversations. 201 when a conversation was created, 200 when an
/// active one with the same participants already existed.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, MessagingError> {
    let created = state
        .messenger
        .create_conversation(
            &caller,
            NewConversationParams {
                participants: req.participants,
                subject: req.subject,
                business_ids: req.business_ids,
            },
        )
        .await?;

    let status = if created.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(CreateConversationResponse {
            conversation_id: created.id,
            created: created.created,
        }),
    ))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, MessagingError> {
    let conversation = state
        .messenger
        .get_conversation(&caller, &conversation_id)
        .await?
        .ok_or(MessagingError::NotFound("conversation"))?;
    Ok(Json(conversation))
}

/// POST /conversations/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, MessagingError> {
    state
        .messenger
        .mark_conversation_as_read(&caller, &conversation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /conversations/{id}/archive
pub async fn archive(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, MessagingError> {
    state
        .messenger
        .archive_conversation(&caller, &conversation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
