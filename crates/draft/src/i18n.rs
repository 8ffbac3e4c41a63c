use std::fmt;
use std::sync::Arc;

use super::error::DraftError;
use super::types::FileKind;

pub const UPLOAD_IMAGE_FAILED: &str = "Error uploading image";
pub const UPLOAD_FILE_FAILED: &str = "Error uploading file";
pub const TOO_MANY_FILES: &str = "You've reached the maximum number of files";
pub const FILE_TYPE_NOT_ACCEPTED: &str = "This file type is not allowed";
pub const FILE_TOO_LARGE: &str = "File is too large";
pub const FILES_DISABLED: &str = "File uploads are disabled";
pub const UPLOADS_PENDING: &str = "Wait until all attachments have uploaded";
pub const SEND_FAILED: &str = "Message failed to send";

/// Injected lookup from an English key to display text.
#[derive(Clone)]
pub struct Translator(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl Translator {
    pub fn new<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(lookup))
    }

    /// Returns every key unchanged.
    pub fn identity() -> Self {
        Self::new(str::to_string)
    }

    pub fn translate(&self, key: &str) -> String {
        (self.0)(key)
    }

    pub fn upload_failed(&self, kind: FileKind) -> String {
        match kind {
            FileKind::Image => self.translate(UPLOAD_IMAGE_FAILED),
            FileKind::File => self.translate(UPLOAD_FILE_FAILED),
        }
    }

    /// User-facing notice for an error the input surface should display.
    pub fn describe(&self, error: &DraftError) -> String {
        let key = match error {
            DraftError::TooManyFiles { .. } => TOO_MANY_FILES,
            DraftError::MimeTypeNotAccepted { .. } => FILE_TYPE_NOT_ACCEPTED,
            DraftError::FileTooLarge { .. } => FILE_TOO_LARGE,
            DraftError::FilesDisabled { .. } => FILES_DISABLED,
            DraftError::UploadsPending { .. } => UPLOADS_PENDING,
            DraftError::SubmissionFailed { .. } => SEND_FAILED,
            other => return other.to_string(),
        };
        self.translate(key)
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Debug for Translator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Translator(..)")
    }
}
