use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{LocalId, MessageId};

/// Upload category, decided from the MIME type and passed to the upload backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    File,
}

impl FileKind {
    /// `image/*` is an image, everything else (including a missing type) is a plain file.
    pub fn from_mime_type(mime_type: &str) -> Self {
        let essence = mime_type.trim().to_ascii_lowercase();
        if essence.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploaded => "uploaded",
            Self::Failed => "failed",
        }
    }
}

/// A file handed over by paste, drop or the file picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            bytes,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mime_type(&self.mime_type)
    }
}

/// One clipboard entry delivered by a paste event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardItem {
    Text(String),
    File(IncomingFile),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub local_id: LocalId,
    pub kind: FileKind,
    pub status: UploadStatus,
    pub remote_url: Option<String>,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    // Bumped on every upload start; completions from an older attempt are stale.
    pub(crate) attempt: u32,
    // Kept only while a retry may still need the payload.
    pub(crate) source: Option<IncomingFile>,
}

impl Attachment {
    pub(crate) fn pending(local_id: LocalId, file: IncomingFile) -> Self {
        Self {
            local_id,
            kind: file.kind(),
            status: UploadStatus::Pending,
            remote_url: None,
            filename: file.filename.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.size_bytes,
            attempt: 1,
            source: Some(file),
        }
    }

    pub(crate) fn uploaded(
        kind: FileKind,
        remote_url: String,
        filename: String,
        mime_type: String,
        size_bytes: u64,
    ) -> Self {
        Self {
            local_id: LocalId::new_v7(),
            kind,
            status: UploadStatus::Uploaded,
            remote_url: Some(remote_url),
            filename,
            mime_type,
            size_bytes,
            attempt: 0,
            source: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, UploadStatus::Pending)
    }

    pub(crate) fn to_outgoing(&self) -> Option<OutgoingAttachment> {
        match (&self.status, &self.remote_url) {
            (UploadStatus::Uploaded, Some(url)) => Some(OutgoingAttachment {
                kind: self.kind,
                url: url.clone(),
                filename: self.filename.clone(),
                mime_type: self.mime_type.clone(),
                size_bytes: self.size_bytes,
            }),
            _ => None,
        }
    }
}

/// The uncommitted message being composed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Draft {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub editing: Option<MessageId>,
}

impl Draft {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.attachments
            .iter()
            .filter(|attachment| attachment.is_pending())
            .count()
    }

    pub fn attachment(&self, local_id: LocalId) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|attachment| attachment.local_id == local_id)
    }

    pub(crate) fn attachment_mut(&mut self, local_id: LocalId) -> Option<&mut Attachment> {
        self.attachments
            .iter_mut()
            .find(|attachment| attachment.local_id == local_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    pub kind: FileKind,
    pub url: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Assembled message handed to the submission backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    pub attachments: Vec<OutgoingAttachment>,
}

/// Attachment as the chat backend stores it on an existing message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExistingAttachment {
    #[serde(rename = "type", default)]
    pub attachment_type: String,
    #[serde(default)]
    pub asset_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub thumb_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub og_scrape_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingMessage {
    pub id: MessageId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<ExistingAttachment>,
}

/// What `submit` did when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing to send; no service was called.
    Skipped,
    Sent,
    Edited,
}

/// Change applied to the draft by one upload completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentUpdate {
    Uploaded {
        local_id: LocalId,
        remote_url: String,
    },
    Failed {
        local_id: LocalId,
        notice: String,
    },
    /// Completion for an attachment that was removed or re-attempted since.
    Discarded { local_id: LocalId },
}

impl AttachmentUpdate {
    pub fn local_id(&self) -> LocalId {
        match self {
            Self::Uploaded { local_id, .. }
            | Self::Failed { local_id, .. }
            | Self::Discarded { local_id } => *local_id,
        }
    }
}

/// Result of a drop/picker batch: admitted ids in order, then the rejections.
#[derive(Debug, Default)]
pub struct BatchReceipt {
    pub admitted: Vec<LocalId>,
    pub rejected: Vec<super::error::DraftError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types_classify_into_image_or_file() {
        assert_eq!(FileKind::from_mime_type("image/png"), FileKind::Image);
        assert_eq!(FileKind::from_mime_type(" IMAGE/JPEG"), FileKind::Image);
        assert_eq!(FileKind::from_mime_type("text/plain"), FileKind::File);
        assert_eq!(FileKind::from_mime_type(""), FileKind::File);
        assert_eq!(FileKind::from_mime_type("application/pdf"), FileKind::File);
    }

    #[test]
    fn whitespace_only_draft_counts_as_empty() {
        let draft = Draft {
            text: "  \n ".to_string(),
            ..Draft::default()
        };
        assert!(draft.is_empty());
    }

    #[test]
    fn only_uploaded_attachments_become_outgoing() {
        let mut attachment =
            Attachment::pending(LocalId::new_v7(), IncomingFile::new("a.txt", "text/plain", "x"));
        assert!(attachment.to_outgoing().is_none());

        attachment.status = UploadStatus::Uploaded;
        attachment.remote_url = Some("https://cdn.example/a.txt".to_string());
        let outgoing = attachment.to_outgoing().unwrap();
        assert_eq!(outgoing.url, "https://cdn.example/a.txt");
        assert_eq!(outgoing.kind, FileKind::File);
        assert_eq!(outgoing.size_bytes, 1);
    }

    #[test]
    fn existing_message_deserializes_from_backend_json() {
        let message: ExistingMessage = serde_json::from_str(
            r#"{
                "id": "msg-1",
                "text": "hello",
                "attachments": [
                    {"type": "file", "asset_url": "somewhere.txt", "mime_type": "text/plain", "title": "title", "file_size": 1000},
                    {"type": "image", "image_url": "somewhere.png", "fallback": "fallback.png"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(message.id.as_str(), "msg-1");
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].file_size, Some(1000));
        assert_eq!(message.attachments[1].attachment_type, "image");
    }
}
