use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::debug;

use b2b_types::api::{SendMessageRequest, ThreadResponse};
use b2b_types::models::Caller;

use crate::attachments::FileUpload;
use crate::error::MessagingError;
use crate::messaging::SendProgressFn;
use crate::participants::ParticipantCache;
use crate::state::AppState;

/// GET /conversations/{id}/messages
///
/// The thread view: conversation, every message oldest first, and each
/// distinct sender resolved once. Reading the thread does not reset the
/// caller's unread count; clients call the read endpoint on entry.
pub async fn get_thread(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, MessagingError> {
    let messenger = &state.messenger;
    let conversation = messenger
        .get_conversation(&caller, &conversation_id)
        .await?
        .ok_or(MessagingError::NotFound("conversation"))?;
    let messages = messenger
        .get_messages(&caller, &conversation_id)
        .await?
        .ok_or(MessagingError::NotFound("conversation"))?;

    let mut cache = ParticipantCache::new(messenger.resolver());
    let mut seen = HashSet::new();
    let mut senders = Vec::new();
    for message in &messages {
        if seen.insert(message.sender_id.as_str()) {
            senders.push(cache.get(&message.sender_id).await?);
        }
    }

    Ok(Json(ThreadResponse {
        conversation,
        messages,
        senders,
    }))
}

/// POST /conversations/{id}/messages
///
/// Attachments arrive inline as base64 and are uploaded before the message
/// is written.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(conversation_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, MessagingError> {
    let mut files = Vec::with_capacity(req.attachments.len());
    for upload in req.attachments {
        let bytes = B64.decode(&upload.data).map_err(|_| {
            MessagingError::validation(format!("attachment {:?} is not valid base64", upload.name))
        })?;
        files.push(FileUpload {
            name: upload.name,
            content_type: upload.content_type,
            bytes,
        });
    }

    let report = |index: usize, pct: f64| {
        debug!(conversation_id = %conversation_id, index, "Attachment upload {:.0}%", pct);
    };

    let message = state
        .messenger
        .send_message(&caller, &conversation_id, &req.text, files, Some(&report as &SendProgressFn<'_>))
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
