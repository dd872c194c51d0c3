/// Database row types. These map directly to SQLite rows.
/// Distinct from b2b-types API models to keep the DB layer independent.
/// Timestamps are kept as the stored text.

pub struct BusinessRow {
    pub id: String,
    pub name: String,
    pub org_number: String,
    pub logo_url: Option<String>,
}

pub struct UserRow {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub photo_url: Option<String>,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_key: String,
    pub kind: String,
    pub subject: Option<String>,
    pub status: String,
    pub last_text: Option<String>,
    pub last_sender_id: Option<String>,
    pub last_has_attachment: bool,
    pub last_created_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Ordered by participant id.
    pub members: Vec<MemberRow>,
    pub business_ids: Vec<String>,
}

pub struct MemberRow {
    pub participant_id: String,
    pub unread_count: i64,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub read: bool,
    pub created_at: String,
    pub attachments: Vec<AttachmentRow>,
}

#[derive(Clone)]
pub struct AttachmentRow {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size: i64,
    pub url: String,
    pub thumbnail_url: Option<String>,
}

/// Input for an insert-if-absent conversation write.
pub struct NewConversation<'a> {
    pub id: &'a str,
    /// Sorted, de-duplicated.
    pub participants: &'a [String],
    pub business_ids: &'a [String],
    pub kind: &'a str,
    pub subject: Option<&'a str>,
    pub now: &'a str,
}

pub enum CreateOutcome {
    Created(String),
    /// An active conversation with the same participant set already existed.
    Existing(String),
}

/// Input for a message append.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub text: &'a str,
    pub attachments: &'a [AttachmentRow],
    pub created_at: &'a str,
}
