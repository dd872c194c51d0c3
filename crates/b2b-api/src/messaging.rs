//! Conversation and message operations.
//!
//! Every operation takes the [`Caller`] explicitly. A conversation is only
//! visible to its participants; for everyone else it does not exist.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use b2b_db::models::{AttachmentRow, ConversationRow, CreateOutcome, MessageRow, NewConversation, NewMessage};
use b2b_db::{Database, format_timestamp, parse_timestamp};
use b2b_types::api::ConversationSummary;
use b2b_types::models::{
    Attachment, Caller, Conversation, ConversationKind, ConversationStatus, LastMessage, Message,
};

use crate::attachments::{self, FileUpload, ObjectStore, ProgressFn, StoredAttachment};
use crate::error::MessagingError;
use crate::participants::{ParticipantCache, ParticipantResolver};

/// Upload progress for a send: `(attachment index, percent)`.
pub type SendProgressFn<'a> = dyn Fn(usize, f64) + Send + Sync + 'a;

#[derive(Debug, Default)]
pub struct NewConversationParams {
    pub participants: Vec<String>,
    pub subject: Option<String>,
    pub business_ids: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CreatedConversation {
    pub id: String,
    /// `false` when an existing active conversation was returned.
    pub created: bool,
}

#[derive(Clone)]
pub struct Messenger {
    db: Arc<Database>,
    store: Arc<dyn ObjectStore>,
    resolver: ParticipantResolver,
}

impl Messenger {
    pub fn new(db: Arc<Database>, store: Arc<dyn ObjectStore>) -> Self {
        let resolver = ParticipantResolver::new(db.clone());
        Self { db, store, resolver }
    }

    pub fn resolver(&self) -> &ParticipantResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, MessagingError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                MessagingError::Storage(e.into())
            })?
            .map_err(MessagingError::from)
    }

    /// Create a conversation between the caller and `participants`, or return
    /// the active conversation that already has exactly that participant set.
    pub async fn create_conversation(
        &self,
        caller: &Caller,
        params: NewConversationParams,
    ) -> Result<CreatedConversation, MessagingError> {
        let mut participants = params.participants;
        participants.push(caller.participant_id.clone());
        if participants.iter().any(|p| p.trim().is_empty()) {
            return Err(MessagingError::validation("participant ids must not be empty"));
        }
        participants.sort();
        participants.dedup();
        if participants.len() < 2 {
            return Err(MessagingError::validation(
                "a conversation needs at least two distinct participants",
            ));
        }

        let mut business_ids: Vec<String> = Vec::with_capacity(params.business_ids.len());
        for id in params.business_ids {
            if !id.trim().is_empty() && !business_ids.contains(&id) {
                business_ids.push(id);
            }
        }

        let subject = params
            .subject
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let kind = ConversationKind::for_business_ids(&business_ids);
        let id = Uuid::new_v4().to_string();
        let now = format_timestamp(&Utc::now());

        let outcome = self
            .blocking(move |db| {
                db.create_conversation_if_absent(&NewConversation {
                    id: &id,
                    participants: &participants,
                    business_ids: &business_ids,
                    kind: kind.as_str(),
                    subject: subject.as_deref(),
                    now: &now,
                })
            })
            .await?;

        match outcome {
            CreateOutcome::Created(id) => {
                info!(conversation_id = %id, "Conversation created");
                Ok(CreatedConversation { id, created: true })
            }
            CreateOutcome::Existing(id) => {
                debug!(conversation_id = %id, "Reusing active conversation");
                Ok(CreatedConversation { id, created: false })
            }
        }
    }

    /// `None` if the conversation does not exist or the caller is not in it.
    pub async fn get_conversation(
        &self,
        caller: &Caller,
        id: &str,
    ) -> Result<Option<Conversation>, MessagingError> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_conversation(&id)).await?;

        Ok(row
            .map(conversation_from_row)
            .filter(|c| c.has_participant(&caller.participant_id)))
    }

    /// The caller's conversations, most recently updated first.
    pub async fn list_conversations(
        &self,
        caller: &Caller,
        include_archived: bool,
    ) -> Result<Vec<Conversation>, MessagingError> {
        let pid = caller.participant_id.clone();
        let rows = self
            .blocking(move |db| db.list_conversations_for(&pid, include_archived))
            .await?;
        Ok(rows.into_iter().map(conversation_from_row).collect())
    }

    /// Conversation list screen: each conversation with its other
    /// participants resolved and the caller's unread count.
    pub async fn list_conversation_summaries(
        &self,
        caller: &Caller,
        include_archived: bool,
    ) -> Result<Vec<ConversationSummary>, MessagingError> {
        let me = caller.participant_id.as_str();
        let conversations = self.list_conversations(caller, include_archived).await?;

        let mut cache = ParticipantCache::new(&self.resolver);
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let mut participant_details = Vec::with_capacity(conversation.participants.len());
            for id in conversation.participants.iter().filter(|p| p.as_str() != me) {
                participant_details.push(cache.get(id).await?);
            }

            let other_participant = conversation
                .other_participant(me)
                .and_then(|other| participant_details.iter().find(|p| p.id() == other).cloned());
            let unread = conversation.unread_for(me);

            summaries.push(ConversationSummary {
                conversation,
                participant_details,
                other_participant,
                unread,
            });
        }

        Ok(summaries)
    }

    /// Reset the caller's unread count to zero. Message `read` flags are left alone.
    pub async fn mark_conversation_as_read(
        &self,
        caller: &Caller,
        conversation_id: &str,
    ) -> Result<(), MessagingError> {
        let cid = conversation_id.to_string();
        let pid = caller.participant_id.clone();
        let now = format_timestamp(&Utc::now());

        let previous = self
            .blocking(move |db| db.mark_conversation_read(&cid, &pid, &now))
            .await?;

        match previous {
            Some(count) => {
                if count > 0 {
                    debug!(conversation_id, participant = %caller.participant_id, count, "Marked conversation read");
                }
                Ok(())
            }
            None => Err(MessagingError::NotFound("conversation")),
        }
    }

    pub async fn archive_conversation(
        &self,
        caller: &Caller,
        conversation_id: &str,
    ) -> Result<(), MessagingError> {
        if self.get_conversation(caller, conversation_id).await?.is_none() {
            return Err(MessagingError::NotFound("conversation"));
        }

        let cid = conversation_id.to_string();
        let now = format_timestamp(&Utc::now());
        let archived = self.blocking(move |db| db.archive_conversation(&cid, &now)).await?;
        if !archived {
            return Err(MessagingError::NotFound("conversation"));
        }

        info!(conversation_id, "Conversation archived");
        Ok(())
    }

    /// All messages, oldest first. `None` if the conversation is not visible
    /// to the caller.
    pub async fn get_messages(
        &self,
        caller: &Caller,
        conversation_id: &str,
    ) -> Result<Option<Vec<Message>>, MessagingError> {
        if self.get_conversation(caller, conversation_id).await?.is_none() {
            return Ok(None);
        }

        let cid = conversation_id.to_string();
        let rows = self.blocking(move |db| db.get_messages(&cid)).await?;
        Ok(Some(rows.into_iter().map(message_from_row).collect()))
    }

    /// Send a message as the caller.
    ///
    /// Attachments are validated and uploaded before anything is written; if
    /// any upload fails the send is aborted, already-uploaded objects are
    /// deleted, and no message exists. The message insert, summary update and
    /// unread increments then commit as one transaction.
    pub async fn send_message(
        &self,
        caller: &Caller,
        conversation_id: &str,
        text: &str,
        files: Vec<FileUpload>,
        on_progress: Option<&SendProgressFn<'_>>,
    ) -> Result<Message, MessagingError> {
        let text = text.trim().to_string();
        if text.is_empty() && files.is_empty() {
            return Err(MessagingError::validation(
                "a message needs text or at least one attachment",
            ));
        }
        for file in &files {
            attachments::validate_upload(file)?;
        }

        // Participants never change, so membership checked here still holds
        // when the message is written.
        let conversation = self
            .get_conversation(caller, conversation_id)
            .await?
            .ok_or(MessagingError::NotFound("conversation"))?;

        // Object paths carry the message id, so concurrent sends never share
        // (or clean up) each other's objects.
        let message_uuid = Uuid::new_v4();
        let message_id = message_uuid.to_string();
        let send_key = message_uuid.simple().to_string();
        let stored = self
            .upload_all(&conversation.id, &send_key, &files, on_progress)
            .await?;

        let created_at = Utc::now().trunc_subsecs(6);
        let rows: Vec<AttachmentRow> = stored.iter().map(|s| attachment_to_row(&s.attachment)).collect();

        let written = {
            let mid = message_id.clone();
            let cid = conversation.id.clone();
            let sender = caller.participant_id.clone();
            let body = text.clone();
            let at = format_timestamp(&created_at);
            self.blocking(move |db| {
                db.send_message(&NewMessage {
                    id: &mid,
                    conversation_id: &cid,
                    sender_id: &sender,
                    text: &body,
                    attachments: &rows,
                    created_at: &at,
                })
            })
            .await
        };

        match written {
            Ok(true) => {}
            Ok(false) => {
                self.discard(&stored).await;
                return Err(MessagingError::NotFound("conversation"));
            }
            Err(e) => {
                self.discard(&stored).await;
                return Err(e);
            }
        }

        info!(
            conversation_id = %conversation.id,
            message_id = %message_id,
            attachments = stored.len(),
            "Message sent"
        );

        Ok(Message {
            id: message_id,
            conversation_id: conversation.id,
            sender_id: caller.participant_id.clone(),
            text,
            attachments: stored.into_iter().map(|s| s.attachment).collect(),
            read: false,
            created_at,
        })
    }

    /// Upload every file concurrently. All or nothing: on any failure the
    /// successful uploads are deleted again.
    async fn upload_all(
        &self,
        conversation_id: &str,
        send_key: &str,
        files: &[FileUpload],
        on_progress: Option<&SendProgressFn<'_>>,
    ) -> Result<Vec<StoredAttachment>, MessagingError> {
        let uploads = files.iter().enumerate().map(|(index, file)| async move {
            let report = on_progress.map(|cb| move |pct: f64| cb(index, pct));
            attachments::upload_attachment(
                self.store.as_ref(),
                conversation_id,
                send_key,
                file,
                index,
                report.as_ref().map(|r| r as &ProgressFn<'_>),
            )
            .await
        });

        let mut stored = Vec::with_capacity(files.len());
        let mut failure = None;
        for result in join_all(uploads).await {
            match result {
                Ok(s) => stored.push(s),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            self.discard(&stored).await;
            return Err(MessagingError::Upload(e));
        }
        Ok(stored)
    }

    async fn discard(&self, stored: &[StoredAttachment]) {
        for s in stored {
            if let Err(e) = self.store.delete(&s.path).await {
                warn!("Failed to delete orphaned attachment {}: {:#}", s.path, e);
            }
        }
    }
}

fn timestamp(raw: &str, field: &str, id: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt {} '{}' on '{}'", field, raw, id);
        DateTime::default()
    })
}

fn conversation_from_row(row: ConversationRow) -> Conversation {
    let status = ConversationStatus::parse(&row.status).unwrap_or_else(|| {
        warn!("Unknown status '{}' on conversation '{}'", row.status, row.id);
        ConversationStatus::Active
    });
    let kind = ConversationKind::parse(&row.kind).unwrap_or(ConversationKind::General);

    let last_message = match (row.last_text, row.last_sender_id, row.last_created_at) {
        (Some(text), Some(sender_id), Some(at)) => Some(LastMessage {
            text,
            sender_id,
            has_attachment: row.last_has_attachment,
            created_at: timestamp(&at, "last_created_at", &row.id),
        }),
        _ => None,
    };

    let unread_count: BTreeMap<String, u32> = row
        .members
        .iter()
        .map(|m| (m.participant_id.clone(), u32::try_from(m.unread_count).unwrap_or(0)))
        .collect();

    Conversation {
        participants: row.members.into_iter().map(|m| m.participant_id).collect(),
        business_ids: row.business_ids,
        kind,
        last_message,
        unread_count,
        status,
        subject: row.subject,
        created_at: timestamp(&row.created_at, "created_at", &row.id),
        updated_at: timestamp(&row.updated_at, "updated_at", &row.id),
        id: row.id,
    }
}

fn message_from_row(row: MessageRow) -> Message {
    Message {
        created_at: timestamp(&row.created_at, "created_at", &row.id),
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        text: row.text,
        attachments: row.attachments.into_iter().map(attachment_from_row).collect(),
        read: row.read,
    }
}

fn attachment_from_row(row: AttachmentRow) -> Attachment {
    Attachment {
        id: row.id,
        name: row.name,
        content_type: row.content_type,
        size: row.size.max(0) as u64,
        url: row.url,
        thumbnail_url: row.thumbnail_url,
    }
}

fn attachment_to_row(a: &Attachment) -> AttachmentRow {
    AttachmentRow {
        id: a.id.clone(),
        name: a.name.clone(),
        content_type: a.content_type.clone(),
        size: i64::try_from(a.size).unwrap_or(i64::MAX),
        url: a.url.clone(),
        thumbnail_url: a.thumbnail_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use b2b_db::models::{BusinessRow, UserRow};
    use b2b_types::models::Participant;

    use super::*;

    /// In-memory object store that fails any path containing `fail_marker`.
    #[derive(Default)]
    struct MemoryStore {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_marker: Option<String>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, path: &str, bytes: &[u8], on_progress: Option<&ProgressFn<'_>>) -> Result<String> {
            if let Some(marker) = &self.fail_marker {
                if path.contains(marker.as_str()) {
                    bail!("simulated outage for {}", path);
                }
            }
            self.objects.lock().unwrap().insert(path.to_string(), bytes.to_vec());
            if let Some(report) = on_progress {
                report(100.0);
            }
            Ok(format!("memory://{}", path))
        }

        async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.objects.lock().unwrap().get(path).cloned())
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.objects.lock().unwrap().remove(path);
            Ok(())
        }
    }

    fn messenger_with(store: Arc<MemoryStore>) -> (Messenger, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (Messenger::new(db.clone(), store), db)
    }

    fn messenger() -> Messenger {
        messenger_with(Arc::new(MemoryStore::default())).0
    }

    fn params(others: &[&str]) -> NewConversationParams {
        NewConversationParams {
            participants: others.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn pdf(name: &str) -> FileUpload {
        FileUpload {
            name: name.into(),
            content_type: "application/pdf".into(),
            bytes: b"%PDF-1.7".to_vec(),
        }
    }

    #[tokio::test]
    async fn example_scenario() {
        let m = messenger();
        let biz = Caller::new("biz-1");
        let user = Caller::new("user-2");

        let conv = m.create_conversation(&biz, params(&["user-2"])).await.unwrap();
        assert!(conv.created);

        m.send_message(&biz, &conv.id, "Hello", vec![], None).await.unwrap();

        let c = m.get_conversation(&user, &conv.id).await.unwrap().unwrap();
        assert_eq!(c.unread_for("biz-1"), 0);
        assert_eq!(c.unread_for("user-2"), 1);
        let last = c.last_message.unwrap();
        assert_eq!(last.text, "Hello");
        assert_eq!(last.sender_id, "biz-1");
        assert!(!last.has_attachment);
        assert_eq!(c.status, ConversationStatus::Active);

        m.mark_conversation_as_read(&user, &conv.id).await.unwrap();
        let c = m.get_conversation(&user, &conv.id).await.unwrap().unwrap();
        assert_eq!(c.unread_for("user-2"), 0);
    }

    #[tokio::test]
    async fn messages_come_back_in_send_order() {
        let m = messenger();
        let a = Caller::new("a");
        let conv = m.create_conversation(&a, params(&["b"])).await.unwrap();

        for i in 0..10 {
            m.send_message(&a, &conv.id, &format!("message {}", i), vec![], None)
                .await
                .unwrap();
        }

        let texts: Vec<String> = m
            .get_messages(&a, &conv.id)
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|msg| msg.text)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("message {}", i)).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn unread_increments_for_everyone_but_sender() {
        let m = messenger();
        let a = Caller::new("A");
        let conv = m.create_conversation(&a, params(&["B", "C"])).await.unwrap();
        m.send_message(&a, &conv.id, "hi all", vec![], None).await.unwrap();

        let c = m.get_conversation(&a, &conv.id).await.unwrap().unwrap();
        assert_eq!(c.unread_for("A"), 0);
        assert_eq!(c.unread_for("B"), 1);
        assert_eq!(c.unread_for("C"), 1);
    }

    #[tokio::test]
    async fn read_reset_leaves_others_alone() {
        let m = messenger();
        let a = Caller::new("A");
        let b = Caller::new("B");
        let conv = m.create_conversation(&a, params(&["B", "C"])).await.unwrap();
        for _ in 0..3 {
            m.send_message(&a, &conv.id, "ping", vec![], None).await.unwrap();
        }

        m.mark_conversation_as_read(&b, &conv.id).await.unwrap();
        let c = m.get_conversation(&a, &conv.id).await.unwrap().unwrap();
        assert_eq!(c.unread_for("B"), 0);
        assert_eq!(c.unread_for("C"), 3);

        // Reset-to-zero then +1 per new message, not accumulated.
        m.send_message(&a, &conv.id, "one more", vec![], None).await.unwrap();
        let c = m.get_conversation(&a, &conv.id).await.unwrap().unwrap();
        assert_eq!(c.unread_for("B"), 1);
        assert_eq!(c.unread_for("C"), 4);

        let messages = m.get_messages(&b, &conv.id).await.unwrap().unwrap();
        assert!(messages.iter().all(|msg| !msg.read));
    }

    #[tokio::test]
    async fn create_reuses_conversation_for_same_set_in_any_order() {
        let m = messenger();
        let first = m
            .create_conversation(&Caller::new("biz-1"), params(&["user-2", "user-3"]))
            .await
            .unwrap();
        let second = m
            .create_conversation(&Caller::new("user-3"), params(&["user-2", "biz-1", "user-3"]))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(m.list_conversations(&Caller::new("user-2"), true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_yield_one_conversation() {
        let m = messenger();
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let m = m.clone();
                let (me, other) = if i % 2 == 0 { ("x", "y") } else { ("y", "x") };
                tokio::spawn(async move {
                    m.create_conversation(&Caller::new(me), params(&[other])).await.unwrap().id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_senders_do_not_lose_increments() {
        let m = messenger();
        let conv = m.create_conversation(&Caller::new("a"), params(&["b", "c"])).await.unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let m = m.clone();
                let id = conv.id.clone();
                let sender = if i % 2 == 0 { "a" } else { "b" };
                tokio::spawn(async move {
                    m.send_message(&Caller::new(sender), &id, "msg", vec![], None).await.unwrap();
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        let c = m.get_conversation(&Caller::new("c"), &conv.id).await.unwrap().unwrap();
        assert_eq!(c.unread_for("a"), 10);
        assert_eq!(c.unread_for("b"), 10);
        assert_eq!(c.unread_for("c"), 20);
    }

    #[tokio::test]
    async fn failed_upload_leaves_no_message_and_no_objects() {
        let store = Arc::new(MemoryStore {
            fail_marker: Some("-1.".into()),
            ..Default::default()
        });
        let (m, db) = messenger_with(store.clone());
        let a = Caller::new("a");
        let conv = m.create_conversation(&a, params(&["b"])).await.unwrap();

        let err = m
            .send_message(&a, &conv.id, "see attached", vec![pdf("one.pdf"), pdf("two.pdf")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Upload(_)));

        assert_eq!(db.count_messages(&conv.id).unwrap(), 0);
        assert!(store.objects.lock().unwrap().is_empty());
        let c = m.get_conversation(&a, &conv.id).await.unwrap().unwrap();
        assert!(c.last_message.is_none());
        assert_eq!(c.unread_for("b"), 0);
    }

    #[tokio::test]
    async fn failed_send_keeps_objects_of_concurrent_send() {
        let store = Arc::new(MemoryStore {
            fail_marker: Some(".txt".into()),
            ..Default::default()
        });
        let (m, db) = messenger_with(store.clone());
        let a = Caller::new("a");
        let b = Caller::new("b");
        let conv = m.create_conversation(&a, params(&["b"])).await.unwrap();

        let notes = FileUpload {
            name: "notes.txt".into(),
            content_type: "text/plain".into(),
            bytes: b"minutes".to_vec(),
        };

        for _ in 0..20 {
            let (ok, failed) = tokio::join!(
                m.send_message(&a, &conv.id, "offer", vec![pdf("offer.pdf")], None),
                m.send_message(&b, &conv.id, "reply", vec![pdf("reply.pdf"), notes.clone()], None),
            );
            assert!(matches!(failed, Err(MessagingError::Upload(_))));

            let sent = ok.unwrap();
            let path = sent.attachments[0].url.strip_prefix("memory://").unwrap().to_string();
            assert!(store.objects.lock().unwrap().contains_key(&path));
        }

        assert_eq!(db.count_messages(&conv.id).unwrap(), 20);
        assert_eq!(store.objects.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn attachments_are_uploaded_and_reported() {
        let store = Arc::new(MemoryStore::default());
        let (m, _db) = messenger_with(store.clone());
        let a = Caller::new("a");
        let conv = m.create_conversation(&a, params(&["b"])).await.unwrap();

        let progress = Mutex::new(Vec::new());
        let report = |index: usize, pct: f64| progress.lock().unwrap().push((index, pct));
        let sent = m
            .send_message(
                &a,
                &conv.id,
                "   ",
                vec![pdf("one.pdf"), pdf("two.pdf")],
                Some(&report as &SendProgressFn<'_>),
            )
            .await
            .unwrap();

        assert_eq!(sent.text, "");
        assert_eq!(sent.attachments.len(), 2);
        assert!(sent.attachments[1].id.ends_with("-1"));
        assert_eq!(store.objects.lock().unwrap().len(), 2);

        let mut seen = progress.into_inner().unwrap();
        seen.sort_by_key(|(index, _)| *index);
        assert_eq!(seen, vec![(0, 100.0), (1, 100.0)]);

        let c = m.get_conversation(&a, &conv.id).await.unwrap().unwrap();
        assert!(c.last_message.unwrap().has_attachment);
        let stored = m.get_messages(&a, &conv.id).await.unwrap().unwrap();
        assert_eq!(stored[0].attachments, sent.attachments);
    }

    #[tokio::test]
    async fn rejects_empty_and_disallowed_messages() {
        let m = messenger();
        let a = Caller::new("a");
        let conv = m.create_conversation(&a, params(&["b"])).await.unwrap();

        let err = m.send_message(&a, &conv.id, "  \n", vec![], None).await.unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));

        let exe = FileUpload {
            name: "setup.exe".into(),
            content_type: "application/x-msdownload".into(),
            bytes: vec![0; 10],
        };
        let err = m.send_message(&a, &conv.id, "run this", vec![exe], None).await.unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));

        let err = m
            .create_conversation(&a, params(&["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));
    }

    #[tokio::test]
    async fn outsiders_cannot_see_or_write() {
        let m = messenger();
        let a = Caller::new("a");
        let eve = Caller::new("eve");
        let conv = m.create_conversation(&a, params(&["b"])).await.unwrap();

        assert!(m.get_conversation(&eve, &conv.id).await.unwrap().is_none());
        assert!(m.get_messages(&eve, &conv.id).await.unwrap().is_none());
        assert!(matches!(
            m.send_message(&eve, &conv.id, "hi", vec![], None).await,
            Err(MessagingError::NotFound(_))
        ));
        assert!(matches!(
            m.mark_conversation_as_read(&eve, &conv.id).await,
            Err(MessagingError::NotFound(_))
        ));
        assert!(matches!(
            m.archive_conversation(&eve, &conv.id).await,
            Err(MessagingError::NotFound(_))
        ));
        assert!(m.get_conversation(&a, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archive_hides_from_default_list_and_allows_fresh_start() {
        let m = messenger();
        let a = Caller::new("a");
        let conv = m.create_conversation(&a, params(&["b"])).await.unwrap();
        m.archive_conversation(&a, &conv.id).await.unwrap();

        assert!(m.list_conversations(&a, false).await.unwrap().is_empty());
        let archived = m.get_conversation(&a, &conv.id).await.unwrap().unwrap();
        assert_eq!(archived.status, ConversationStatus::Archived);

        let fresh = m.create_conversation(&a, params(&["b"])).await.unwrap();
        assert!(fresh.created);
        assert_ne!(fresh.id, conv.id);
    }

    #[tokio::test]
    async fn summaries_resolve_the_other_participant() {
        let (m, db) = messenger_with(Arc::new(MemoryStore::default()));
        db.upsert_business(&BusinessRow {
            id: "biz-1".into(),
            name: "Fjord Fisk AS".into(),
            org_number: "912345678".into(),
            logo_url: None,
        })
        .unwrap();
        db.upsert_user(&UserRow {
            id: "user-2".into(),
            first_name: "Kari".into(),
            last_name: "Nordmann".into(),
            email: "kari@example.com".into(),
            photo_url: None,
        })
        .unwrap();

        let user = Caller::new("user-2");
        let conv = m
            .create_conversation(
                &user,
                NewConversationParams {
                    participants: vec!["biz-1".into()],
                    subject: Some("  Wholesale prices ".into()),
                    business_ids: vec!["biz-1".into(), "biz-1".into()],
                },
            )
            .await
            .unwrap();
        m.send_message(&Caller::new("biz-1"), &conv.id, "Welcome", vec![], None)
            .await
            .unwrap();

        let summaries = m.list_conversation_summaries(&user, false).await.unwrap();
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.unread, 1);
        assert_eq!(s.conversation.subject.as_deref(), Some("Wholesale prices"));
        assert_eq!(s.conversation.kind, ConversationKind::BusinessToBusiness);
        assert_eq!(s.conversation.business_ids, vec!["biz-1".to_string()]);
        assert!(matches!(s.other_participant, Some(Participant::Business(ref b)) if b.name == "Fjord Fisk AS"));
        assert_eq!(s.participant_details.len(), 1);
    }
}
