//! Message attachments: validation rules, object paths, and the object store
//! that turns file bytes into a URL.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use b2b_types::models::Attachment;

use crate::error::MessagingError;

/// Upload progress callback, called with a percentage in `0.0..=100.0`.
pub type ProgressFn<'a> = dyn Fn(f64) + Send + Sync + 'a;

const MIB: u64 = 1024 * 1024;

/// Progress is reported after each chunk of this size is written.
const WRITE_CHUNK: usize = 64 * 1024;

const ALLOWED_TYPES: &[&str] = &[
    // Images
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    // Documents
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    // Archives
    "application/zip",
    "application/x-rar-compressed",
    // Other
    "application/json",
    "text/csv",
];

/// A file as received from the sender, before upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub fn is_allowed_file_type(content_type: &str) -> bool {
    ALLOWED_TYPES.contains(&content_type)
}

/// Per-type upload ceiling in bytes.
pub fn max_file_size(content_type: &str) -> u64 {
    if content_type.starts_with("image/") {
        10 * MIB
    } else if content_type.starts_with("video/") {
        50 * MIB
    } else if content_type.starts_with("audio/") {
        30 * MIB
    } else {
        20 * MIB
    }
}

/// `1536` → `"1.5 KB"`. At most two decimals, trailing zeros dropped.
pub fn readable_file_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

    if size == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

/// Icon category the UI shows next to an attachment.
pub fn file_icon(content_type: &str) -> &'static str {
    match content_type {
        t if t.starts_with("image/") => "image",
        t if t.starts_with("video/") => "video",
        t if t.starts_with("audio/") => "audio",
        "application/pdf" => "pdf",
        "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "word",
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "excel",
        "application/vnd.ms-powerpoint"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            "powerpoint"
        }
        _ => "file",
    }
}

pub fn validate_upload(file: &FileUpload) -> Result<(), MessagingError> {
    if file.name.trim().is_empty() {
        return Err(MessagingError::validation("attachment name is empty"));
    }
    if !is_allowed_file_type(&file.content_type) {
        return Err(MessagingError::validation(format!(
            "file type not allowed: {}",
            file.content_type
        )));
    }
    if file.bytes.is_empty() {
        return Err(MessagingError::validation(format!("{} is empty", file.name)));
    }
    let limit = max_file_size(&file.content_type);
    if file.bytes.len() as u64 > limit {
        return Err(MessagingError::validation(format!(
            "{} is {}, the limit for {} is {}",
            file.name,
            readable_file_size(file.bytes.len() as u64),
            file.content_type,
            readable_file_size(limit)
        )));
    }
    Ok(())
}

/// Object path for a message attachment:
/// `messages/{conversation}/{millis}-{send_key}-{index}.{ext}`.
///
/// `send_key` is unique per send, so two sends landing in the same
/// millisecond never share an object.
pub fn attachment_path(
    conversation_id: &str,
    millis: i64,
    send_key: &str,
    index: usize,
    file_name: &str,
) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("file");
    format!("messages/{}/{}-{}-{}.{}", conversation_id, millis, send_key, index, ext)
}

/// Object storage collaborator. Implementations must be safe to share across requests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `path` and return the URL it can be fetched from.
    async fn put(&self, path: &str, bytes: &[u8], on_progress: Option<&ProgressFn<'_>>) -> Result<String>;

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Stores objects as plain files under a directory and serves them from
/// `{public_url}/files/{path}`.
pub struct LocalObjectStore {
    dir: PathBuf,
    public_url: String,
}

impl LocalObjectStore {
    pub async fn new(dir: PathBuf, public_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/files/{}", self.public_url, path)
    }

    /// Map an object path onto the storage directory. Only plain relative
    /// segments are accepted, so a path can never escape `dir`.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if !is_valid_object_path(path) {
            bail!("Invalid object path: {:?}", path);
        }
        Ok(self.dir.join(path))
    }
}

/// Non-empty, relative, and made only of plain segments (no `..`, `.` or root).
pub fn is_valid_object_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Writes to a temporary sibling, then hard-links it into place. An
    /// existing object is never overwritten, and a failed write leaves
    /// nothing behind at `path`.
    async fn put(&self, path: &str, bytes: &[u8], on_progress: Option<&ProgressFn<'_>>) -> Result<String> {
        let file_path = self.resolve(path)?;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let part_path = part_path_for(&file_path);
        let published = async {
            let mut file = fs::File::create(&part_path).await?;
            write_chunks(&mut file, bytes, on_progress).await?;
            file.sync_all().await?;
            drop(file);
            fs::hard_link(&part_path, &file_path)
                .await
                .with_context(|| format!("Failed to publish object {}", path))?;
            anyhow::Ok(())
        }
        .await;

        match fs::remove_file(&part_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial upload {}: {}", part_path.display(), e),
        }

        published?;
        Ok(self.url_for(path))
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let file_path = self.resolve(path)?;
        match fs::read(&file_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file_path = self.resolve(path)?;
        match fs::remove_file(&file_path).await {
            Ok(()) => {
                info!("Deleted object {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {} already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Hidden, uniquely named sibling of `target` used while an upload is in flight.
fn part_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
}

async fn write_chunks(file: &mut fs::File, bytes: &[u8], on_progress: Option<&ProgressFn<'_>>) -> Result<()> {
    let total = bytes.len();
    let mut written = 0;
    for chunk in bytes.chunks(WRITE_CHUNK) {
        file.write_all(chunk).await?;
        written += chunk.len();
        if let Some(report) = on_progress {
            report(written as f64 * 100.0 / total as f64);
        }
    }
    file.flush().await?;

    if total == 0 {
        if let Some(report) = on_progress {
            report(100.0);
        }
    }
    Ok(())
}

/// An uploaded attachment and the object path it lives at.
#[derive(Debug, Clone)]
pub struct StoredAttachment {
    pub path: String,
    pub attachment: Attachment,
}

/// Upload one file of a message. The attachment id is `{millis}-{index}`,
/// sharing the timestamp used in the object path.
pub async fn upload_attachment(
    store: &dyn ObjectStore,
    conversation_id: &str,
    send_key: &str,
    file: &FileUpload,
    index: usize,
    on_progress: Option<&ProgressFn<'_>>,
) -> Result<StoredAttachment> {
    let millis = Utc::now().timestamp_millis();
    let path = attachment_path(conversation_id, millis, send_key, index, &file.name);
    let url = store.put(&path, &file.bytes, on_progress).await?;

    Ok(StoredAttachment {
        path,
        attachment: Attachment {
            id: format!("{}-{}", millis, index),
            name: file.name.clone(),
            content_type: file.content_type.clone(),
            size: file.bytes.len() as u64,
            url,
            thumbnail_url: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn file(name: &str, content_type: &str, len: usize) -> FileUpload {
        FileUpload {
            name: name.into(),
            content_type: content_type.into(),
            bytes: vec![7u8; len],
        }
    }

    #[test]
    fn readable_sizes() {
        assert_eq!(readable_file_size(0), "0 Bytes");
        assert_eq!(readable_file_size(512), "512 Bytes");
        assert_eq!(readable_file_size(1536), "1.5 KB");
        assert_eq!(readable_file_size(10 * MIB), "10 MB");
        assert_eq!(readable_file_size(1_234_567), "1.18 MB");
    }

    #[test]
    fn icons_and_limits() {
        assert_eq!(file_icon("image/png"), "image");
        assert_eq!(file_icon("application/vnd.ms-excel"), "excel");
        assert_eq!(file_icon("application/zip"), "file");
        assert_eq!(max_file_size("image/jpeg"), 10 * MIB);
        assert_eq!(max_file_size("video/mp4"), 50 * MIB);
        assert_eq!(max_file_size("audio/mpeg"), 30 * MIB);
        assert_eq!(max_file_size("application/pdf"), 20 * MIB);
    }

    #[test]
    fn validation_rules() {
        assert!(validate_upload(&file("a.pdf", "application/pdf", 10)).is_ok());
        assert!(validate_upload(&file("a.exe", "application/x-msdownload", 10)).is_err());
        assert!(validate_upload(&file("a.pdf", "application/pdf", 0)).is_err());
        assert!(validate_upload(&file("big.png", "image/png", (10 * MIB + 1) as usize)).is_err());
        assert!(validate_upload(&file("  ", "text/plain", 3)).is_err());
    }

    #[test]
    fn paths_use_last_extension() {
        assert_eq!(
            attachment_path("conv-7", 1700, "k1", 2, "report.final.PDF"),
            "messages/conv-7/1700-k1-2.PDF"
        );
        assert_eq!(
            attachment_path("conv-7", 1700, "k1", 0, "README"),
            "messages/conv-7/1700-k1-0.file"
        );
        assert_eq!(
            attachment_path("conv-7", 1700, "k1", 0, "x./../y"),
            "messages/conv-7/1700-k1-0.file"
        );
        assert_ne!(
            attachment_path("conv-7", 1700, "k1", 0, "a.pdf"),
            attachment_path("conv-7", 1700, "k2", 0, "a.pdf")
        );
    }

    #[tokio::test]
    async fn local_store_round_trip_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://files.test/")
            .await
            .unwrap();

        let seen = Mutex::new(Vec::new());
        let bytes = vec![1u8; WRITE_CHUNK * 2 + 10];

        let url = {
            let report = |pct: f64| seen.lock().unwrap().push(pct);
            store
                .put("messages/conv-1/1-0.bin", &bytes, Some(&report as &ProgressFn<'_>))
                .await
                .unwrap()
        };
        assert_eq!(url, "http://files.test/files/messages/conv-1/1-0.bin");

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));

        assert_eq!(store.get("messages/conv-1/1-0.bin").await.unwrap(), Some(bytes));
        store.delete("messages/conv-1/1-0.bin").await.unwrap();
        assert_eq!(store.get("messages/conv-1/1-0.bin").await.unwrap(), None);
        store.delete("messages/conv-1/1-0.bin").await.unwrap();
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://files.test")
            .await
            .unwrap();

        assert!(store.put("../outside", b"x", None).await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
        assert!(store.get("./messages/x").await.is_err());
        assert!(store.get("").await.is_err());
    }

    #[tokio::test]
    async fn local_store_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://files.test")
            .await
            .unwrap();

        store.put("messages/c/1-k-0.txt", b"first", None).await.unwrap();
        assert!(store.put("messages/c/1-k-0.txt", b"second", None).await.is_err());
        assert_eq!(
            store.get("messages/c/1-k-0.txt").await.unwrap().as_deref(),
            Some(&b"first"[..])
        );
    }

    #[tokio::test]
    async fn failed_put_leaves_no_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://files.test")
            .await
            .unwrap();

        // A directory squatting on the target makes publishing fail after the
        // bytes were written.
        let conv_dir = dir.path().join("messages").join("c");
        std::fs::create_dir_all(conv_dir.join("1-k-0.bin")).unwrap();

        let bytes = vec![9u8; WRITE_CHUNK + 1];
        assert!(store.put("messages/c/1-k-0.bin", &bytes, None).await.is_err());

        let names: Vec<String> = std::fs::read_dir(&conv_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1-k-0.bin".to_string()]);
        assert!(conv_dir.join("1-k-0.bin").is_dir());
    }

    #[tokio::test]
    async fn upload_attachment_fills_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://files.test")
            .await
            .unwrap();

        let stored = upload_attachment(
            &store,
            "conv-1",
            "send-a",
            &file("offer.pdf", "application/pdf", 42),
            3,
            None,
        )
        .await
        .unwrap();

        assert!(stored.path.starts_with("messages/conv-1/"));
        assert!(stored.path.ends_with("-send-a-3.pdf"));
        assert!(stored.attachment.id.ends_with("-3"));
        assert_eq!(stored.attachment.size, 42);
        assert_eq!(stored.attachment.url, store.url_for(&stored.path));
        assert_eq!(store.get(&stored.path).await.unwrap().map(|b| b.len()), Some(42));
    }
}
