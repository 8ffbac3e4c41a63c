use snafu::Snafu;

use super::ids::LocalId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DraftError {
    #[snafu(display("draft controller requires a tokio runtime on `{stage}`: {source}"))]
    NoRuntime {
        stage: &'static str,
        source: tokio::runtime::TryCurrentError,
    },
    #[snafu(display("draft already holds the maximum of {limit} files"))]
    TooManyFiles { stage: &'static str, limit: usize },
    #[snafu(display("file '{filename}' has type '{mime_type}' which is not accepted"))]
    MimeTypeNotAccepted {
        stage: &'static str,
        filename: String,
        mime_type: String,
    },
    #[snafu(display("file '{filename}' is {size_bytes} bytes, over the {limit} byte limit"))]
    FileTooLarge {
        stage: &'static str,
        filename: String,
        size_bytes: u64,
        limit: u64,
    },
    #[snafu(display("file uploads are disabled, '{filename}' was not attached"))]
    FilesDisabled {
        stage: &'static str,
        filename: String,
    },
    #[snafu(display("attachment '{local_id}' is not part of the draft"))]
    AttachmentNotFound {
        stage: &'static str,
        local_id: LocalId,
    },
    #[snafu(display("attachment '{local_id}' is {status} and cannot be retried"))]
    NotRetryable {
        stage: &'static str,
        local_id: LocalId,
        status: &'static str,
    },
    #[snafu(display("{pending} attachment upload(s) still in flight"))]
    UploadsPending { stage: &'static str, pending: usize },
    #[snafu(display("message submission failed on `{stage}`: {source}"))]
    SubmissionFailed {
        stage: &'static str,
        source: ServiceError,
    },
    #[snafu(display("local id '{raw}' is invalid"))]
    InvalidLocalId {
        stage: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("{id_type} must not be blank"))]
    BlankRemoteId {
        stage: &'static str,
        id_type: &'static str,
    },
}

impl DraftError {
    /// Whether the error rejected a file before any attachment was created.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            Self::TooManyFiles { .. }
                | Self::MimeTypeNotAccepted { .. }
                | Self::FileTooLarge { .. }
                | Self::FilesDisabled { .. }
        )
    }
}

pub type DraftResult<T> = Result<T, DraftError>;

/// Failure reported by an external collaborator (upload or submission backend).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceError {
    #[snafu(display("{service} rejected the request: {message}"))]
    Rejected {
        service: &'static str,
        message: String,
    },
    #[snafu(display("{service} transport failed: {source}"))]
    Transport {
        service: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;
