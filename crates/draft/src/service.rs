use futures::future::BoxFuture;

use super::error::ServiceResult;
use super::ids::{ChannelId, MessageId, UserId};
use super::types::{FileKind, IncomingFile, MessagePayload};

/// Channel the draft is composed in, passed down explicitly instead of looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelContext {
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

impl ChannelContext {
    pub fn new(channel_id: ChannelId, user_id: UserId) -> Self {
        Self {
            channel_id,
            user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub channel: ChannelContext,
    pub kind: FileKind,
    pub file: IncomingFile,
}

pub trait UploadService: Send + Sync {
    /// Uploads one file and resolves to its remote URL.
    fn upload<'a>(&'a self, request: UploadRequest) -> BoxFuture<'a, ServiceResult<String>>;
}

pub trait SubmissionService: Send + Sync {
    fn send<'a>(
        &'a self,
        channel: &'a ChannelContext,
        payload: MessagePayload,
    ) -> BoxFuture<'a, ServiceResult<()>>;

    fn edit<'a>(
        &'a self,
        channel: &'a ChannelContext,
        message_id: &'a MessageId,
        payload: MessagePayload,
    ) -> BoxFuture<'a, ServiceResult<()>>;
}
