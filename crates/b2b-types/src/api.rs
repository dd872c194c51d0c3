use serde::{Deserialize, Serialize};

use crate::models::{Business, Conversation, Message, Participant, User};

// -- JWT Claims --

/// Claims issued by the identity provider. `sub` is the caller's participant id
/// (a business id or a user id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    /// Other parties. The caller is always added.
    pub participants: Vec<String>,
    pub subject: Option<String>,
    #[serde(default)]
    pub business_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub conversation_id: String,
    /// `false` when an active conversation with the same participants was reused.
    pub created: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationListQuery {
    #[serde(default)]
    pub archived: bool,
}

/// List-view row: the conversation plus who is in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participant_details: Vec<Participant>,
    pub other_participant: Option<Participant>,
    /// The caller's own unread count.
    pub unread: u32,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

/// A file carried inline in a send request.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentUpload {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    /// Standard base64 of the file bytes.
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadResponse {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    /// Every distinct sender in `messages`, resolved once.
    pub senders: Vec<Participant>,
}

// -- Directory --

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    5
}

/// Body of `PUT /directory/businesses/{id}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertBusinessRequest {
    pub name: String,
    #[serde(default)]
    pub org_number: String,
    pub logo_url: Option<String>,
}

/// Body of `PUT /directory/users/{id}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertUserRequest {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub businesses: Vec<Business>,
    pub users: Vec<User>,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
