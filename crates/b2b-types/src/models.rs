use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The identity on whose behalf a service operation runs.
///
/// Built from the verified JWT at the HTTP edge and passed explicitly into
/// every messaging operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub participant_id: String,
}

impl Caller {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationKind {
    Inquiry,
    Application,
    BusinessToBusiness,
    General,
}

impl ConversationKind {
    /// Conversations that concern at least one business are business-to-business.
    pub fn for_business_ids(business_ids: &[String]) -> Self {
        if business_ids.is_empty() {
            Self::General
        } else {
            Self::BusinessToBusiness
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inquiry => "inquiry",
            Self::Application => "application",
            Self::BusinessToBusiness => "business-to-business",
            Self::General => "general",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "inquiry" => Some(Self::Inquiry),
            "application" => Some(Self::Application),
            "business-to-business" => Some(Self::BusinessToBusiness),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Denormalized summary of the newest message, kept on the conversation so
/// list views never read the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub sender_id: String,
    pub has_attachment: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Sorted, de-duplicated. Never changes after creation.
    pub participants: Vec<String>,
    #[serde(default)]
    pub business_ids: Vec<String>,
    pub kind: ConversationKind,
    pub last_message: Option<LastMessage>,
    pub unread_count: BTreeMap<String, u32>,
    pub status: ConversationStatus,
    pub subject: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.participants.iter().any(|p| p == participant_id)
    }

    pub fn unread_for(&self, participant_id: &str) -> u32 {
        self.unread_count.get(participant_id).copied().unwrap_or(0)
    }

    /// The counterpart in a 1-to-1 conversation. `None` for group conversations.
    pub fn other_participant(&self, participant_id: &str) -> Option<&str> {
        if self.participants.len() != 2 || !self.has_participant(participant_id) {
            return None;
        }
        self.participants
            .iter()
            .find(|p| p.as_str() != participant_id)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Legacy per-message flag. Unread state lives on the conversation.
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    pub org_number: String,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub photo_url: Option<String>,
}

/// A conversation member as seen by the UI.
///
/// Identifiers are resolved against businesses first and users second, so an
/// id present in both collections always comes back as `Business`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Participant {
    Business(Business),
    User(User),
    Unknown { id: String },
}

impl Participant {
    pub fn id(&self) -> &str {
        match self {
            Self::Business(b) => &b.id,
            Self::User(u) => &u.id,
            Self::Unknown { id } => id,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::Business(b) => b.name.clone(),
            Self::User(u) => format!("{} {}", u.first_name, u.last_name).trim().to_string(),
            Self::Unknown { .. } => "Unknown participant".to_string(),
        }
    }

    pub fn avatar_url(&self) -> Option<&str> {
        match self {
            Self::Business(b) => b.logo_url.as_deref(),
            Self::User(u) => u.photo_url.as_deref(),
            Self::Unknown { .. } => None,
        }
    }

    pub fn is_business(&self) -> bool {
        matches!(self, Self::Business(_))
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}
