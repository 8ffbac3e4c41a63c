pub mod controller;
pub mod error;
pub mod i18n;
pub mod ids;
pub mod memory;
pub mod service;
pub mod settings;
pub mod types;

pub use controller::DraftController;
pub use error::{DraftError, DraftResult, ServiceError, ServiceResult};
pub use i18n::Translator;
pub use ids::{ChannelId, LocalId, MessageId, UserId};
pub use service::{ChannelContext, SubmissionService, UploadRequest, UploadService};
pub use settings::{DraftSettings, DraftSettingsStore, SettingsError};
pub use types::{
    Attachment, AttachmentUpdate, BatchReceipt, ClipboardItem, Draft, ExistingAttachment,
    ExistingMessage, FileKind, IncomingFile, MessagePayload, OutgoingAttachment, SubmitOutcome,
    UploadStatus,
};
