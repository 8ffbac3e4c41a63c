use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::{
    AttachmentNotFoundSnafu, DraftResult, FileTooLargeSnafu, FilesDisabledSnafu,
    MimeTypeNotAcceptedSnafu, NoRuntimeSnafu, NotRetryableSnafu, RejectedSnafu, ServiceResult,
    SubmissionFailedSnafu, TooManyFilesSnafu, UploadsPendingSnafu,
};
use super::i18n::Translator;
use super::ids::LocalId;
use super::service::{ChannelContext, SubmissionService, UploadRequest, UploadService};
use super::settings::DraftSettings;
use super::types::{
    Attachment, AttachmentUpdate, BatchReceipt, ClipboardItem, Draft, ExistingAttachment,
    ExistingMessage, FileKind, IncomingFile, MessagePayload, SubmitOutcome, UploadStatus,
};

struct UploadCompletion {
    local_id: LocalId,
    attempt: u32,
    result: ServiceResult<String>,
}

/// Owns one composition session: draft text, attachment uploads and submission.
///
/// Every mutation goes through `&mut self`. Upload tasks never touch the draft; they
/// report back over a channel and the owner folds completions in with
/// [`DraftController::next_update`], [`DraftController::drain_updates`] or
/// [`DraftController::settle`].
pub struct DraftController {
    channel: ChannelContext,
    settings: DraftSettings,
    translator: Translator,
    uploader: Arc<dyn UploadService>,
    submitter: Arc<dyn SubmissionService>,
    runtime: Handle,
    draft: Draft,
    in_flight: HashMap<LocalId, JoinHandle<()>>,
    completion_tx: mpsc::UnboundedSender<UploadCompletion>,
    completion_rx: mpsc::UnboundedReceiver<UploadCompletion>,
}

impl DraftController {
    /// Must be called from inside a tokio runtime; uploads are spawned onto it.
    pub fn new(
        channel: ChannelContext,
        uploader: Arc<dyn UploadService>,
        submitter: Arc<dyn SubmissionService>,
    ) -> DraftResult<Self> {
        let runtime = Handle::try_current().context(NoRuntimeSnafu {
            stage: "draft-controller-new",
        })?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            channel,
            settings: DraftSettings::default(),
            translator: Translator::identity(),
            uploader,
            submitter,
            runtime,
            draft: Draft::default(),
            in_flight: HashMap::new(),
            completion_tx,
            completion_rx,
        })
    }

    pub fn with_settings(mut self, settings: DraftSettings) -> Self {
        self.settings = settings.normalized();
        self
    }

    pub fn with_translator(mut self, translator: Translator) -> Self {
        self.translator = translator;
        self
    }

    pub fn channel(&self) -> &ChannelContext {
        &self.channel
    }

    pub fn settings(&self) -> &DraftSettings {
        &self.settings
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn text(&self) -> &str {
        &self.draft.text
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.draft.attachments
    }

    pub fn attachment(&self, local_id: LocalId) -> Option<&Attachment> {
        self.draft.attachment(local_id)
    }

    pub fn is_editing(&self) -> bool {
        self.draft.editing.is_some()
    }

    pub fn has_pending_uploads(&self) -> bool {
        self.draft.pending_count() > 0
    }

    /// Whether a submit would reach the submission service right now.
    pub fn can_submit(&self) -> bool {
        !self.draft.is_empty() && !self.has_pending_uploads()
    }

    pub fn set_text(&mut self, value: impl Into<String>) {
        self.draft.text = value.into();
    }

    pub fn insert_text(&mut self, snippet: &str) {
        self.draft.text.push_str(snippet);
    }

    /// Inserts at a character offset; offsets past the end append.
    pub fn insert_text_at(&mut self, char_offset: usize, snippet: &str) {
        let byte_index = self
            .draft
            .text
            .char_indices()
            .nth(char_offset)
            .map(|(index, _)| index)
            .unwrap_or(self.draft.text.len());
        self.draft.text.insert_str(byte_index, snippet);
    }

    pub fn receive_file(&mut self, file: IncomingFile) -> DraftResult<LocalId> {
        self.admit(&file)?;

        let local_id = LocalId::new_v7();
        let attachment = Attachment::pending(local_id, file.clone());
        tracing::debug!(
            channel_id = %self.channel.channel_id,
            local_id = %local_id,
            kind = %attachment.kind,
            filename = %attachment.filename,
            size_bytes = attachment.size_bytes,
            "attachment received; starting upload"
        );

        self.spawn_upload(local_id, attachment.attempt, attachment.kind, file);
        self.draft.attachments.push(attachment);
        Ok(local_id)
    }

    /// Drop or picker batch. Each file is admitted or rejected on its own.
    pub fn receive_files(&mut self, files: impl IntoIterator<Item = IncomingFile>) -> BatchReceipt {
        let limit = if self.settings.multiple_uploads {
            usize::MAX
        } else {
            1
        };

        let mut receipt = BatchReceipt::default();
        for file in files.into_iter().take(limit) {
            match self.receive_file(file) {
                Ok(local_id) => receipt.admitted.push(local_id),
                Err(error) => {
                    tracing::debug!(error = %error, "file rejected from batch");
                    receipt.rejected.push(error);
                }
            }
        }
        receipt
    }

    /// Files become attachments; plain text is appended to the draft.
    pub fn paste(&mut self, items: impl IntoIterator<Item = ClipboardItem>) -> BatchReceipt {
        let mut files = Vec::new();
        for item in items {
            match item {
                ClipboardItem::Text(text) => self.insert_text(&text),
                ClipboardItem::File(file) => files.push(file),
            }
        }
        self.receive_files(files)
    }

    /// Returns the removed attachment, or `None` when the id is unknown.
    pub fn remove_attachment(&mut self, local_id: LocalId) -> Option<Attachment> {
        let position = self
            .draft
            .attachments
            .iter()
            .position(|attachment| attachment.local_id == local_id)?;

        if let Some(task) = self.in_flight.remove(&local_id) {
            task.abort();
        }

        tracing::debug!(local_id = %local_id, "attachment removed");
        Some(self.draft.attachments.remove(position))
    }

    pub fn retry_upload(&mut self, local_id: LocalId) -> DraftResult<()> {
        let others_active = self
            .draft
            .attachments
            .iter()
            .filter(|attachment| {
                attachment.local_id != local_id && attachment.status != UploadStatus::Failed
            })
            .count();
        let limit = self.settings.max_number_of_files;

        let attachment =
            self.draft
                .attachment_mut(local_id)
                .context(AttachmentNotFoundSnafu {
                    stage: "retry-upload-lookup",
                    local_id,
                })?;

        ensure!(
            attachment.status == UploadStatus::Failed,
            NotRetryableSnafu {
                stage: "retry-upload-status",
                local_id,
                status: attachment.status.as_str(),
            }
        );
        let file = attachment.source.clone().context(NotRetryableSnafu {
            stage: "retry-upload-source",
            local_id,
            status: attachment.status.as_str(),
        })?;
        // The slot a failed upload gave up may have been taken in the meantime.
        ensure!(
            others_active < limit,
            TooManyFilesSnafu {
                stage: "retry-upload-count",
                limit,
            }
        );

        attachment.status = UploadStatus::Pending;
        attachment.attempt += 1;
        let attempt = attachment.attempt;
        let kind = attachment.kind;

        tracing::debug!(local_id = %local_id, attempt, "retrying attachment upload");
        self.spawn_upload(local_id, attempt, kind, file);
        Ok(())
    }

    /// Waits for one upload completion and applies it.
    ///
    /// Returns `None` right away when nothing is pending.
    pub async fn next_update(&mut self) -> Option<AttachmentUpdate> {
        if !self.has_pending_uploads() {
            return None;
        }

        let completion = self.completion_rx.recv().await?;
        Some(self.apply_completion(completion))
    }

    /// Applies every completion that already arrived, without waiting.
    pub fn drain_updates(&mut self) -> Vec<AttachmentUpdate> {
        let mut updates = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            updates.push(self.apply_completion(completion));
        }
        updates
    }

    /// Waits until no attachment is pending.
    pub async fn settle(&mut self) -> Vec<AttachmentUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    /// Sends (or, in edit mode, edits) the message.
    ///
    /// An empty draft is a silent no-op. Submitting while an upload is in flight is
    /// refused with [`DraftError::UploadsPending`](super::DraftError::UploadsPending).
    /// Failed attachments are left out of the payload. On failure the draft is kept.
    pub async fn submit(&mut self) -> DraftResult<SubmitOutcome> {
        self.drain_updates();

        if self.draft.is_empty() {
            tracing::debug!(channel_id = %self.channel.channel_id, "empty draft; nothing to submit");
            return Ok(SubmitOutcome::Skipped);
        }

        let pending = self.draft.pending_count();
        ensure!(
            pending == 0,
            UploadsPendingSnafu {
                stage: "submit-check-pending",
                pending,
            }
        );

        let payload = MessagePayload {
            text: self.draft.text.trim().to_string(),
            attachments: self
                .draft
                .attachments
                .iter()
                .filter_map(Attachment::to_outgoing)
                .collect(),
        };
        if payload.text.is_empty() && payload.attachments.is_empty() {
            tracing::debug!(
                channel_id = %self.channel.channel_id,
                "only failed attachments left; nothing to submit"
            );
            return Ok(SubmitOutcome::Skipped);
        }

        let attachment_count = payload.attachments.len();
        let (result, outcome) = match &self.draft.editing {
            Some(message_id) => (
                self.submitter
                    .edit(&self.channel, message_id, payload)
                    .await,
                SubmitOutcome::Edited,
            ),
            None => (
                self.submitter.send(&self.channel, payload).await,
                SubmitOutcome::Sent,
            ),
        };

        if let Err(error) = &result {
            tracing::warn!(
                channel_id = %self.channel.channel_id,
                editing = self.draft.editing.is_some(),
                error = %error,
                "message submission failed; draft kept"
            );
        }
        result.context(SubmissionFailedSnafu {
            stage: "submit-message",
        })?;

        tracing::info!(
            channel_id = %self.channel.channel_id,
            outcome = ?outcome,
            attachment_count,
            "message submitted"
        );
        self.reset();
        Ok(outcome)
    }

    /// Seeds the draft from an existing message and switches to edit mode.
    pub fn load_for_edit(&mut self, message: &ExistingMessage) {
        self.abort_uploads();

        let attachments = message
            .attachments
            .iter()
            .filter_map(attachment_from_existing)
            .collect::<Vec<_>>();
        tracing::debug!(
            message_id = %message.id,
            loaded = attachments.len(),
            skipped = message.attachments.len() - attachments.len(),
            "draft seeded for edit"
        );

        self.draft = Draft {
            text: message.text.clone(),
            attachments,
            editing: Some(message.id.clone()),
        };
    }

    /// Drops the draft, aborts uploads and leaves edit mode.
    pub fn cancel(&mut self) {
        tracing::debug!(channel_id = %self.channel.channel_id, "draft cancelled");
        self.reset();
    }

    fn reset(&mut self) {
        self.abort_uploads();
        self.draft = Draft::default();
    }

    fn abort_uploads(&mut self) {
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
    }

    fn admit(&self, file: &IncomingFile) -> DraftResult<()> {
        let kind = file.kind();
        ensure!(
            self.settings.accepts_kind(kind),
            FilesDisabledSnafu {
                stage: "admit-file-kind",
                filename: file.filename.clone(),
            }
        );
        ensure!(
            self.settings.accepts_mime_type(&file.mime_type),
            MimeTypeNotAcceptedSnafu {
                stage: "admit-mime-type",
                filename: file.filename.clone(),
                mime_type: file.mime_type.clone(),
            }
        );
        if let Some(limit) = self.settings.max_file_size_bytes {
            ensure!(
                file.size_bytes <= limit,
                FileTooLargeSnafu {
                    stage: "admit-file-size",
                    filename: file.filename.clone(),
                    size_bytes: file.size_bytes,
                    limit,
                }
            );
        }

        // Failed uploads do not hold a slot; the user is expected to retry or remove them.
        let active = self
            .draft
            .attachments
            .iter()
            .filter(|attachment| attachment.status != UploadStatus::Failed)
            .count();
        ensure!(
            active < self.settings.max_number_of_files,
            TooManyFilesSnafu {
                stage: "admit-file-count",
                limit: self.settings.max_number_of_files,
            }
        );
        Ok(())
    }

    fn spawn_upload(&mut self, local_id: LocalId, attempt: u32, kind: FileKind, file: IncomingFile) {
        let uploader = Arc::clone(&self.uploader);
        let completion_tx = self.completion_tx.clone();
        let request = UploadRequest {
            channel: self.channel.clone(),
            kind,
            file,
        };

        let task = self.runtime.spawn(async move {
            let filename = request.file.filename.clone();
            // A panicking backend still has to resolve the attachment as failed.
            let result = match AssertUnwindSafe(uploader.upload(request))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => RejectedSnafu {
                    service: "upload service",
                    message: format!("upload of '{filename}' panicked"),
                }
                .fail(),
            };
            // The controller may be gone already; nothing left to update then.
            let _ = completion_tx.send(UploadCompletion {
                local_id,
                attempt,
                result,
            });
        });

        if let Some(previous) = self.in_flight.insert(local_id, task) {
            previous.abort();
        }
    }

    fn apply_completion(&mut self, completion: UploadCompletion) -> AttachmentUpdate {
        let UploadCompletion {
            local_id,
            attempt,
            result,
        } = completion;

        let Some(attachment) = self.draft.attachment_mut(local_id) else {
            tracing::debug!(local_id = %local_id, "completion for removed attachment discarded");
            return AttachmentUpdate::Discarded { local_id };
        };
        if attachment.attempt != attempt || !attachment.is_pending() {
            tracing::debug!(
                local_id = %local_id,
                attempt,
                current_attempt = attachment.attempt,
                "stale upload completion discarded"
            );
            return AttachmentUpdate::Discarded { local_id };
        }
        self.in_flight.remove(&local_id);

        match result {
            Ok(remote_url) => {
                attachment.status = UploadStatus::Uploaded;
                attachment.remote_url = Some(remote_url.clone());
                attachment.source = None;
                tracing::debug!(local_id = %local_id, remote_url = %remote_url, "attachment uploaded");
                AttachmentUpdate::Uploaded {
                    local_id,
                    remote_url,
                }
            }
            Err(error) => {
                attachment.status = UploadStatus::Failed;
                tracing::warn!(
                    channel_id = %self.channel.channel_id,
                    local_id = %local_id,
                    kind = %attachment.kind,
                    error = %error,
                    "attachment upload failed"
                );
                AttachmentUpdate::Failed {
                    local_id,
                    notice: self.translator.upload_failed(attachment.kind),
                }
            }
        }
    }
}

impl Drop for DraftController {
    fn drop(&mut self) {
        self.abort_uploads();
    }
}

fn attachment_from_existing(existing: &ExistingAttachment) -> Option<Attachment> {
    let mime_type = existing.mime_type.clone().unwrap_or_default();
    let size_bytes = existing.file_size.unwrap_or(0);

    match existing.attachment_type.as_str() {
        // Link previews are rendered from the text; they are not editable uploads.
        "image" if existing.og_scrape_url.is_none() => {
            let url = existing
                .image_url
                .clone()
                .or_else(|| existing.thumb_url.clone())?;
            let filename = existing
                .fallback
                .clone()
                .or_else(|| existing.title.clone())
                .unwrap_or_default();
            Some(Attachment::uploaded(
                FileKind::Image,
                url,
                filename,
                mime_type,
                size_bytes,
            ))
        }
        "file" | "audio" | "video" => {
            let url = existing.asset_url.clone()?;
            let filename = existing.title.clone().unwrap_or_default();
            Some(Attachment::uploaded(
                FileKind::File,
                url,
                filename,
                mime_type,
                size_bytes,
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DraftError;
    use crate::i18n::UPLOAD_FILE_FAILED;
    use crate::ids::{ChannelId, MessageId, UserId};
    use crate::memory::{MemorySubmissionService, MemoryUploadService};

    const FILE_UPLOAD_URL: &str = "http://www.getstream.io";

    struct Fixture {
        uploads: Arc<MemoryUploadService>,
        submissions: Arc<MemorySubmissionService>,
        controller: DraftController,
    }

    fn channel() -> ChannelContext {
        ChannelContext::new(
            ChannelId::parse("messaging:general").unwrap(),
            UserId::parse("user-1").unwrap(),
        )
    }

    fn fixture_with(uploads: MemoryUploadService, settings: DraftSettings) -> Fixture {
        let uploads = Arc::new(uploads);
        let submissions = Arc::new(MemorySubmissionService::new());
        let controller = DraftController::new(channel(), uploads.clone(), submissions.clone())
            .unwrap()
            .with_settings(settings);
        Fixture {
            uploads,
            submissions,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            MemoryUploadService::fixed(FILE_UPLOAD_URL),
            DraftSettings::default(),
        )
    }

    fn text_file(filename: &str) -> IncomingFile {
        IncomingFile::new(filename, "text/plain", "content")
    }

    fn png(filename: &str) -> IncomingFile {
        IncomingFile::new(filename, "image/png", "(⌐□_□)")
    }

    #[test]
    fn constructing_outside_a_runtime_fails() {
        let error = DraftController::new(
            channel(),
            Arc::new(MemoryUploadService::new("https://cdn.example")),
            Arc::new(MemorySubmissionService::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(error, DraftError::NoRuntime { .. }));
    }

    #[tokio::test]
    async fn empty_draft_never_reaches_submission_service() {
        let mut fixture = fixture();

        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Skipped);
        fixture.controller.set_text("   ");
        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Skipped);

        assert!(fixture.submissions.submissions().await.is_empty());
    }

    #[tokio::test]
    async fn text_is_submitted_once_and_draft_resets() {
        let mut fixture = fixture();
        fixture.controller.set_text("Some text");

        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Sent);

        let submissions = fixture.submissions.submissions().await;
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].payload.text, "Some text");
        assert!(submissions[0].payload.attachments.is_empty());
        assert!(submissions[0].edited.is_none());
        assert_eq!(fixture.controller.draft(), &Draft::default());
    }

    #[tokio::test]
    async fn uploads_are_tagged_by_mime_type() {
        let mut fixture = fixture();

        fixture.controller.receive_file(png("chucknorris.png")).unwrap();
        fixture.controller.receive_file(text_file("some.txt")).unwrap();
        fixture.controller.settle().await;

        let mut requests = fixture.uploads.requests().await;
        requests.sort_by(|left, right| left.filename.cmp(&right.filename));
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].filename, "chucknorris.png");
        assert_eq!(requests[0].kind, FileKind::Image);
        assert_eq!(requests[1].filename, "some.txt");
        assert_eq!(requests[1].kind, FileKind::File);
    }

    #[tokio::test]
    async fn uploaded_attachment_carries_returned_url() {
        let mut fixture = fixture();

        let local_id = fixture.controller.receive_file(text_file("some.txt")).unwrap();
        assert!(fixture.controller.attachment(local_id).unwrap().is_pending());

        let update = fixture.controller.next_update().await.unwrap();
        assert_eq!(
            update,
            AttachmentUpdate::Uploaded {
                local_id,
                remote_url: FILE_UPLOAD_URL.to_string(),
            }
        );

        let attachment = fixture.controller.attachment(local_id).unwrap();
        assert_eq!(attachment.status, UploadStatus::Uploaded);
        assert_eq!(attachment.remote_url.as_deref(), Some(FILE_UPLOAD_URL));
        assert_eq!(attachment.filename, "some.txt");
        assert!(fixture.controller.next_update().await.is_none());
    }

    #[tokio::test]
    async fn attachments_keep_receipt_order_whatever_the_completion_order() {
        let mut fixture = fixture_with(
            MemoryUploadService::new("https://cdn.example").held(),
            DraftSettings::default(),
        );

        let first = fixture.controller.receive_file(text_file("a.txt")).unwrap();
        let second = fixture.controller.receive_file(png("b.png")).unwrap();
        let third = fixture.controller.receive_file(text_file("c.txt")).unwrap();
        fixture.uploads.release(3);
        fixture.controller.settle().await;

        let order = fixture
            .controller
            .attachments()
            .iter()
            .map(|attachment| attachment.local_id)
            .collect::<Vec<_>>();
        assert_eq!(order, vec![first, second, third]);
        assert!(
            fixture
                .controller
                .attachments()
                .iter()
                .all(|attachment| attachment.status == UploadStatus::Uploaded)
        );
    }

    #[tokio::test]
    async fn failed_upload_is_isolated_and_retryable() {
        let mut fixture = fixture_with(
            MemoryUploadService::new("https://cdn.example"),
            DraftSettings::default(),
        );
        fixture.uploads.fail_times("broken.txt", 1).await;

        let healthy = fixture.controller.receive_file(text_file("ok.txt")).unwrap();
        let broken = fixture.controller.receive_file(text_file("broken.txt")).unwrap();
        let updates = fixture.controller.settle().await;

        assert!(updates.contains(&AttachmentUpdate::Failed {
            local_id: broken,
            notice: UPLOAD_FILE_FAILED.to_string(),
        }));
        assert_eq!(fixture.controller.attachments().len(), 2);
        assert_eq!(
            fixture.controller.attachment(healthy).unwrap().status,
            UploadStatus::Uploaded
        );
        assert_eq!(
            fixture.controller.attachment(broken).unwrap().status,
            UploadStatus::Failed
        );

        fixture.controller.retry_upload(broken).unwrap();
        assert!(fixture.controller.has_pending_uploads());
        fixture.controller.settle().await;

        let retried = fixture.controller.attachment(broken).unwrap();
        assert_eq!(retried.status, UploadStatus::Uploaded);
        assert_eq!(
            retried.remote_url.as_deref(),
            Some("https://cdn.example/broken.txt")
        );
    }

    #[tokio::test]
    async fn only_failed_attachments_can_be_retried() {
        let mut fixture = fixture();
        let local_id = fixture.controller.receive_file(text_file("some.txt")).unwrap();
        fixture.controller.settle().await;

        let error = fixture.controller.retry_upload(local_id).unwrap_err();
        assert!(matches!(
            error,
            DraftError::NotRetryable {
                status: "uploaded",
                ..
            }
        ));

        let error = fixture.controller.retry_upload(LocalId::new_v7()).unwrap_err();
        assert!(matches!(error, DraftError::AttachmentNotFound { .. }));
    }

    #[tokio::test]
    async fn failed_attachments_are_left_out_of_the_payload() {
        let mut fixture = fixture_with(
            MemoryUploadService::new("https://cdn.example"),
            DraftSettings::default(),
        );
        fixture.uploads.fail_always("broken.txt").await;

        fixture.controller.receive_file(png("photo.png")).unwrap();
        fixture.controller.receive_file(text_file("broken.txt")).unwrap();
        fixture.controller.settle().await;

        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Sent);

        let submissions = fixture.submissions.submissions().await;
        let attachments = &submissions[0].payload.attachments;
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].kind, FileKind::Image);
        assert_eq!(attachments[0].url, "https://cdn.example/photo.png");
        assert_eq!(submissions[0].payload.text, "");
    }

    #[tokio::test]
    async fn draft_with_only_failed_uploads_is_not_submitted() {
        let mut fixture = fixture();
        fixture.uploads.fail_always("broken.txt").await;

        fixture.controller.receive_file(text_file("broken.txt")).unwrap();
        fixture.controller.settle().await;

        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Skipped);
        assert!(fixture.submissions.submissions().await.is_empty());
        assert_eq!(fixture.controller.attachments().len(), 1);
    }

    #[tokio::test]
    async fn submit_is_refused_while_uploads_are_in_flight() {
        let mut fixture = fixture_with(
            MemoryUploadService::fixed(FILE_UPLOAD_URL).held(),
            DraftSettings::default(),
        );
        fixture.controller.set_text("with attachment");
        fixture.controller.receive_file(text_file("some.txt")).unwrap();
        assert!(!fixture.controller.can_submit());

        let error = fixture.controller.submit().await.unwrap_err();
        assert!(matches!(error, DraftError::UploadsPending { pending: 1, .. }));
        assert!(fixture.submissions.submissions().await.is_empty());
        assert_eq!(fixture.controller.text(), "with attachment");

        fixture.uploads.release(1);
        fixture.controller.settle().await;
        assert!(fixture.controller.can_submit());
        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Sent);

        let submissions = fixture.submissions.submissions().await;
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].payload.attachments[0].url, FILE_UPLOAD_URL);
    }

    #[tokio::test]
    async fn submission_failure_keeps_the_draft() {
        let mut fixture = fixture();
        fixture.controller.set_text("retry me");
        let local_id = fixture.controller.receive_file(text_file("some.txt")).unwrap();
        fixture.controller.settle().await;
        fixture.submissions.fail_next(1);

        let error = fixture.controller.submit().await.unwrap_err();
        assert!(matches!(error, DraftError::SubmissionFailed { .. }));
        assert_eq!(fixture.controller.text(), "retry me");
        assert!(fixture.controller.attachment(local_id).is_some());
        assert_eq!(fixture.submissions.submissions().await.len(), 1);

        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Sent);
        assert_eq!(fixture.submissions.submissions().await.len(), 2);
        assert!(fixture.controller.attachments().is_empty());
    }

    #[tokio::test]
    async fn removing_a_pending_attachment_discards_its_completion() {
        let mut fixture = fixture_with(
            MemoryUploadService::fixed(FILE_UPLOAD_URL).held(),
            DraftSettings::default(),
        );
        let local_id = fixture.controller.receive_file(text_file("some.txt")).unwrap();

        let removed = fixture.controller.remove_attachment(local_id).unwrap();
        assert_eq!(removed.filename, "some.txt");
        assert!(fixture.controller.remove_attachment(local_id).is_none());

        fixture.uploads.release(1);
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let updates = fixture.controller.drain_updates();
        assert!(
            updates
                .iter()
                .all(|update| *update == AttachmentUpdate::Discarded { local_id })
        );
        assert!(fixture.controller.attachments().is_empty());
        assert!(fixture.controller.next_update().await.is_none());
    }

    #[tokio::test]
    async fn removing_an_unknown_attachment_is_a_noop() {
        let mut fixture = fixture();
        fixture.controller.receive_file(text_file("some.txt")).unwrap();
        fixture.controller.settle().await;

        assert!(fixture.controller.remove_attachment(LocalId::new_v7()).is_none());
        assert_eq!(fixture.controller.attachments().len(), 1);
    }

    #[tokio::test]
    async fn edit_loads_file_and_image_attachments() {
        let mut fixture = fixture();
        let message = ExistingMessage {
            id: MessageId::parse("msg-1").unwrap(),
            text: "original".to_string(),
            attachments: vec![
                ExistingAttachment {
                    attachment_type: "file".to_string(),
                    asset_url: Some("somewhere.txt".to_string()),
                    mime_type: Some("text/plain".to_string()),
                    title: Some("title".to_string()),
                    file_size: Some(1000),
                    ..ExistingAttachment::default()
                },
                ExistingAttachment {
                    attachment_type: "image".to_string(),
                    image_url: Some("somewhere.png".to_string()),
                    fallback: Some("fallback.png".to_string()),
                    ..ExistingAttachment::default()
                },
                ExistingAttachment {
                    attachment_type: "image".to_string(),
                    image_url: Some("preview.png".to_string()),
                    og_scrape_url: Some("https://example.com".to_string()),
                    ..ExistingAttachment::default()
                },
            ],
        };

        fixture.controller.load_for_edit(&message);

        assert!(fixture.controller.is_editing());
        assert_eq!(fixture.controller.text(), "original");
        let attachments = fixture.controller.attachments();
        assert_eq!(attachments.len(), 2);

        let files = attachments
            .iter()
            .filter(|attachment| attachment.kind == FileKind::File)
            .collect::<Vec<_>>();
        let images = attachments
            .iter()
            .filter(|attachment| attachment.kind == FileKind::Image)
            .collect::<Vec<_>>();
        assert_eq!(files.len(), 1);
        assert_eq!(images.len(), 1);
        assert_eq!(files[0].remote_url.as_deref(), Some("somewhere.txt"));
        assert_eq!(files[0].filename, "title");
        assert_eq!(files[0].size_bytes, 1000);
        assert_eq!(images[0].remote_url.as_deref(), Some("somewhere.png"));
        assert!(
            attachments
                .iter()
                .all(|attachment| attachment.status == UploadStatus::Uploaded)
        );
    }

    #[tokio::test]
    async fn submitting_in_edit_mode_edits_and_leaves_edit_mode() {
        let mut fixture = fixture();
        let message_id = MessageId::parse("msg-7").unwrap();
        fixture.controller.load_for_edit(&ExistingMessage {
            id: message_id.clone(),
            text: "typo".to_string(),
            attachments: Vec::new(),
        });
        fixture.controller.set_text("fixed");

        assert_eq!(fixture.controller.submit().await.unwrap(), SubmitOutcome::Edited);

        let submissions = fixture.submissions.submissions().await;
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].edited.as_ref(), Some(&message_id));
        assert_eq!(submissions[0].payload.text, "fixed");
        assert!(!fixture.controller.is_editing());
    }

    #[tokio::test]
    async fn cancel_aborts_uploads_and_leaves_edit_mode() {
        let mut fixture = fixture_with(
            MemoryUploadService::fixed(FILE_UPLOAD_URL).held(),
            DraftSettings::default(),
        );
        fixture.controller.load_for_edit(&ExistingMessage {
            id: MessageId::parse("msg-9").unwrap(),
            text: "draft".to_string(),
            attachments: Vec::new(),
        });
        fixture.controller.receive_file(text_file("some.txt")).unwrap();

        fixture.controller.cancel();

        assert_eq!(fixture.controller.draft(), &Draft::default());
        assert!(!fixture.controller.has_pending_uploads());
        assert!(fixture.controller.next_update().await.is_none());
    }

    #[tokio::test]
    async fn admission_limits_reject_without_creating_attachments() {
        let settings = DraftSettings {
            max_number_of_files: 1,
            max_file_size_bytes: Some(16),
            accepted_mime_types: vec!["image/*".to_string(), "text/plain".to_string()],
            files_enabled: true,
            multiple_uploads: true,
        };
        let mut fixture = fixture_with(MemoryUploadService::fixed(FILE_UPLOAD_URL), settings);

        let error = fixture
            .controller
            .receive_file(IncomingFile::new("doc.pdf", "application/pdf", "x"))
            .unwrap_err();
        assert!(matches!(error, DraftError::MimeTypeNotAccepted { .. }));

        let error = fixture
            .controller
            .receive_file(IncomingFile::new("big.txt", "text/plain", vec![0_u8; 17]))
            .unwrap_err();
        assert!(matches!(error, DraftError::FileTooLarge { limit: 16, .. }));

        fixture.controller.receive_file(text_file("some.txt")).unwrap();
        let error = fixture.controller.receive_file(png("one-more.png")).unwrap_err();
        assert!(matches!(error, DraftError::TooManyFiles { limit: 1, .. }));
        assert!(error.is_admission_rejection());

        assert_eq!(fixture.controller.attachments().len(), 1);
    }

    #[tokio::test]
    async fn disabled_files_still_accept_images() {
        let settings = DraftSettings {
            files_enabled: false,
            ..DraftSettings::default()
        };
        let mut fixture = fixture_with(MemoryUploadService::fixed(FILE_UPLOAD_URL), settings);

        let error = fixture.controller.receive_file(text_file("some.txt")).unwrap_err();
        assert!(matches!(error, DraftError::FilesDisabled { .. }));
        assert!(fixture.controller.receive_file(png("photo.png")).is_ok());
    }

    #[tokio::test]
    async fn single_upload_mode_takes_first_dropped_file() {
        let settings = DraftSettings {
            multiple_uploads: false,
            ..DraftSettings::default()
        };
        let mut fixture = fixture_with(MemoryUploadService::fixed(FILE_UPLOAD_URL), settings);

        let receipt = fixture
            .controller
            .receive_files(vec![png("first.png"), png("second.png")]);

        assert_eq!(receipt.admitted.len(), 1);
        assert!(receipt.rejected.is_empty());
        assert_eq!(fixture.controller.attachments()[0].filename, "first.png");
    }

    #[tokio::test]
    async fn batch_collects_rejections_and_keeps_going() {
        let settings = DraftSettings {
            accepted_mime_types: vec!["image/*".to_string()],
            ..DraftSettings::default()
        };
        let mut fixture = fixture_with(MemoryUploadService::fixed(FILE_UPLOAD_URL), settings);

        let receipt = fixture.controller.receive_files(vec![
            text_file("notes.txt"),
            png("photo.png"),
        ]);

        assert_eq!(receipt.admitted.len(), 1);
        assert_eq!(receipt.rejected.len(), 1);
        assert_eq!(fixture.controller.attachments()[0].filename, "photo.png");
    }

    #[tokio::test]
    async fn paste_appends_text_and_uploads_files() {
        let mut fixture = fixture();
        fixture.controller.set_text("see ");

        let receipt = fixture.controller.paste(vec![
            ClipboardItem::Text("attached".to_string()),
            ClipboardItem::File(text_file("some.txt")),
        ]);
        fixture.controller.settle().await;

        assert_eq!(fixture.controller.text(), "see attached");
        assert_eq!(receipt.admitted.len(), 1);
        let attachment = fixture.controller.attachment(receipt.admitted[0]).unwrap();
        assert_eq!(attachment.remote_url.as_deref(), Some(FILE_UPLOAD_URL));
    }

    #[tokio::test]
    async fn emoji_inserts_at_character_offset() {
        let mut fixture = fixture();

        fixture.controller.insert_text("💯");
        assert_eq!(fixture.controller.text(), "💯");

        fixture.controller.set_text("héllo");
        fixture.controller.insert_text_at(2, "💯");
        assert_eq!(fixture.controller.text(), "hé💯llo");

        fixture.controller.insert_text_at(99, "!");
        assert_eq!(fixture.controller.text(), "hé💯llo!");
    }

    #[tokio::test]
    async fn upload_failure_notice_uses_injected_translator() {
        let uploads = MemoryUploadService::new("https://cdn.example");
        uploads.fail_always("broken.png").await;
        let mut fixture = fixture_with(uploads, DraftSettings::default());
        fixture.controller = fixture
            .controller
            .with_translator(Translator::new(|key| format!("[de] {key}")));

        let local_id = fixture.controller.receive_file(png("broken.png")).unwrap();
        let update = fixture.controller.next_update().await.unwrap();

        assert_eq!(
            update,
            AttachmentUpdate::Failed {
                local_id,
                notice: "[de] Error uploading image".to_string(),
            }
        );
    }

    struct PanickingUploadService;

    impl UploadService for PanickingUploadService {
        fn upload<'a>(
            &'a self,
            _request: UploadRequest,
        ) -> futures::future::BoxFuture<'a, ServiceResult<String>> {
            crash_upload().boxed()
        }
    }

    async fn crash_upload() -> ServiceResult<String> {
        panic!("upload backend crashed")
    }

    #[tokio::test]
    async fn retry_is_refused_when_the_freed_slot_was_taken() {
        let settings = DraftSettings {
            max_number_of_files: 1,
            ..DraftSettings::default()
        };
        let mut fixture = fixture_with(MemoryUploadService::new("https://cdn.example"), settings);
        fixture.uploads.fail_times("a.txt", 1).await;

        let first = fixture.controller.receive_file(text_file("a.txt")).unwrap();
        fixture.controller.settle().await;
        assert_eq!(
            fixture.controller.attachment(first).unwrap().status,
            UploadStatus::Failed
        );

        fixture.controller.receive_file(text_file("b.txt")).unwrap();
        fixture.controller.settle().await;

        let error = fixture.controller.retry_upload(first).unwrap_err();
        assert!(matches!(
            error,
            DraftError::TooManyFiles {
                stage: "retry-upload-count",
                limit: 1,
            }
        ));
        assert_eq!(
            fixture.controller.attachment(first).unwrap().status,
            UploadStatus::Failed
        );
        assert!(!fixture.controller.has_pending_uploads());

        fixture.controller.remove_attachment(first);
        let active = fixture
            .controller
            .attachments()
            .iter()
            .filter(|attachment| attachment.status != UploadStatus::Failed)
            .count();
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn retry_within_limit_is_allowed_for_the_only_attachment() {
        let settings = DraftSettings {
            max_number_of_files: 1,
            ..DraftSettings::default()
        };
        let mut fixture = fixture_with(MemoryUploadService::new("https://cdn.example"), settings);
        fixture.uploads.fail_times("a.txt", 1).await;

        let local_id = fixture.controller.receive_file(text_file("a.txt")).unwrap();
        fixture.controller.settle().await;

        fixture.controller.retry_upload(local_id).unwrap();
        fixture.controller.settle().await;
        assert_eq!(
            fixture.controller.attachment(local_id).unwrap().status,
            UploadStatus::Uploaded
        );
    }

    #[tokio::test]
    async fn panicking_upload_resolves_as_failed() {
        let submissions = Arc::new(MemorySubmissionService::new());
        let mut controller =
            DraftController::new(channel(), Arc::new(PanickingUploadService), submissions.clone())
                .unwrap();

        let local_id = controller.receive_file(text_file("some.txt")).unwrap();
        let updates = tokio::time::timeout(std::time::Duration::from_secs(5), controller.settle())
            .await
            .unwrap();

        assert_eq!(
            updates,
            vec![AttachmentUpdate::Failed {
                local_id,
                notice: UPLOAD_FILE_FAILED.to_string(),
            }]
        );
        assert!(!controller.has_pending_uploads());

        controller.set_text("still sendable");
        assert_eq!(controller.submit().await.unwrap(), SubmitOutcome::Sent);
        assert!(submissions.submissions().await[0].payload.attachments.is_empty());
    }

    #[tokio::test]
    async fn load_for_edit_discards_in_flight_uploads() {
        let mut fixture = fixture_with(
            MemoryUploadService::fixed(FILE_UPLOAD_URL).held(),
            DraftSettings::default(),
        );
        let pending = fixture.controller.receive_file(text_file("some.txt")).unwrap();

        fixture.controller.load_for_edit(&ExistingMessage {
            id: MessageId::parse("msg-3").unwrap(),
            text: "edit me".to_string(),
            attachments: Vec::new(),
        });
        fixture.uploads.release(1);
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let updates = fixture.controller.drain_updates();
        assert!(
            updates
                .iter()
                .all(|update| *update == AttachmentUpdate::Discarded { local_id: pending })
        );
        assert!(fixture.controller.attachment(pending).is_none());
        assert!(fixture.controller.attachments().is_empty());
        assert_eq!(fixture.controller.text(), "edit me");
        assert!(fixture.controller.is_editing());
    }

    #[tokio::test]
    async fn edit_mapping_falls_back_and_skips_unusable_attachments() {
        let mut fixture = fixture();
        fixture.controller.load_for_edit(&ExistingMessage {
            id: MessageId::parse("msg-4").unwrap(),
            text: String::new(),
            attachments: vec![
                ExistingAttachment {
                    attachment_type: "image".to_string(),
                    thumb_url: Some("thumb.png".to_string()),
                    title: Some("holiday".to_string()),
                    ..ExistingAttachment::default()
                },
                ExistingAttachment {
                    attachment_type: "audio".to_string(),
                    asset_url: Some("song.mp3".to_string()),
                    ..ExistingAttachment::default()
                },
                ExistingAttachment {
                    attachment_type: "video".to_string(),
                    asset_url: Some("clip.mp4".to_string()),
                    ..ExistingAttachment::default()
                },
                ExistingAttachment {
                    attachment_type: "giphy".to_string(),
                    image_url: Some("funny.gif".to_string()),
                    ..ExistingAttachment::default()
                },
                ExistingAttachment {
                    attachment_type: "file".to_string(),
                    title: Some("no-url.txt".to_string()),
                    ..ExistingAttachment::default()
                },
                ExistingAttachment {
                    attachment_type: "image".to_string(),
                    ..ExistingAttachment::default()
                },
            ],
        });

        let attachments = fixture.controller.attachments();
        assert_eq!(attachments.len(), 3);

        assert_eq!(attachments[0].kind, FileKind::Image);
        assert_eq!(attachments[0].remote_url.as_deref(), Some("thumb.png"));
        assert_eq!(attachments[0].filename, "holiday");

        assert_eq!(attachments[1].kind, FileKind::File);
        assert_eq!(attachments[1].remote_url.as_deref(), Some("song.mp3"));
        assert_eq!(attachments[2].kind, FileKind::File);
        assert_eq!(attachments[2].remote_url.as_deref(), Some("clip.mp4"));
    }
}
