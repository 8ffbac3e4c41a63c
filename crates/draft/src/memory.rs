//! In-process upload and submission backends.
//!
//! They record every call and can be told to fail or to hold uploads open, which is
//! what the controller tests and the QA runner need to drive each lifecycle branch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, Semaphore};

use super::error::{RejectedSnafu, ServiceResult};
use super::ids::{ChannelId, MessageId};
use super::service::{ChannelContext, SubmissionService, UploadRequest, UploadService};
use super::types::{FileKind, MessagePayload};

const UPLOAD_SERVICE: &str = "memory upload service";
const SUBMISSION_SERVICE: &str = "memory submission service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub channel_id: ChannelId,
    pub kind: FileKind,
    pub filename: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UrlScheme {
    Fixed(String),
    Prefix(String),
}

pub struct MemoryUploadService {
    urls: UrlScheme,
    // Remaining forced failures per filename.
    failures: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<RecordedUpload>>,
    gate: Option<Semaphore>,
}

impl MemoryUploadService {
    /// Every upload resolves to `{prefix}/{filename}`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            urls: UrlScheme::Prefix(prefix.into().trim_end_matches('/').to_string()),
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every upload resolves to the same URL.
    pub fn fixed(url: impl Into<String>) -> Self {
        Self {
            urls: UrlScheme::Fixed(url.into()),
            ..Self::new("")
        }
    }

    /// Uploads stay in flight until [`MemoryUploadService::release`] lets them through.
    pub fn held(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub async fn fail_times(&self, filename: impl Into<String>, times: usize) {
        self.failures.lock().await.insert(filename.into(), times);
    }

    pub async fn fail_always(&self, filename: impl Into<String>) {
        self.fail_times(filename, usize::MAX).await;
    }

    pub fn release(&self, uploads: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(uploads);
        }
    }

    pub async fn requests(&self) -> Vec<RecordedUpload> {
        self.requests.lock().await.clone()
    }

    fn url_for(&self, filename: &str) -> String {
        match &self.urls {
            UrlScheme::Fixed(url) => url.clone(),
            UrlScheme::Prefix(prefix) => format!("{prefix}/{filename}"),
        }
    }

    async fn take_failure(&self, filename: &str) -> bool {
        let mut failures = self.failures.lock().await;
        match failures.get_mut(filename) {
            Some(0) | None => false,
            Some(remaining) => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }
}

impl UploadService for MemoryUploadService {
    fn upload<'a>(&'a self, request: UploadRequest) -> BoxFuture<'a, ServiceResult<String>> {
        async move {
            self.requests.lock().await.push(RecordedUpload {
                channel_id: request.channel.channel_id.clone(),
                kind: request.kind,
                filename: request.file.filename.clone(),
                mime_type: request.file.mime_type.clone(),
            });

            if let Some(gate) = &self.gate {
                // A closed semaphore never happens here; treat it as an open gate.
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            if self.take_failure(&request.file.filename).await {
                return RejectedSnafu {
                    service: UPLOAD_SERVICE,
                    message: format!("upload of '{}' refused", request.file.filename),
                }
                .fail();
            }

            Ok(self.url_for(&request.file.filename))
        }
        .boxed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSubmission {
    pub channel_id: ChannelId,
    pub edited: Option<MessageId>,
    pub payload: MessagePayload,
}

#[derive(Default)]
pub struct MemorySubmissionService {
    pending_failures: AtomicUsize,
    submissions: Mutex<Vec<RecordedSubmission>>,
}

impl MemorySubmissionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` calls fail after being recorded.
    pub fn fail_next(&self, times: usize) {
        self.pending_failures.store(times, Ordering::SeqCst);
    }

    pub async fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().await.clone()
    }

    async fn record(
        &self,
        channel: &ChannelContext,
        edited: Option<MessageId>,
        payload: MessagePayload,
    ) -> ServiceResult<()> {
        self.submissions.lock().await.push(RecordedSubmission {
            channel_id: channel.channel_id.clone(),
            edited,
            payload,
        });

        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failing {
            return RejectedSnafu {
                service: SUBMISSION_SERVICE,
                message: "message refused".to_string(),
            }
            .fail();
        }

        Ok(())
    }
}

impl SubmissionService for MemorySubmissionService {
    fn send<'a>(
        &'a self,
        channel: &'a ChannelContext,
        payload: MessagePayload,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        self.record(channel, None, payload).boxed()
    }

    fn edit<'a>(
        &'a self,
        channel: &'a ChannelContext,
        message_id: &'a MessageId,
        payload: MessagePayload,
    ) -> BoxFuture<'a, ServiceResult<()>> {
        self.record(channel, Some(message_id.clone()), payload)
            .boxed()
    }
}
