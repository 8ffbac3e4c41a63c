use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};

use zova_draft::memory::{MemorySubmissionService, MemoryUploadService};
use zova_draft::{
    AttachmentUpdate, ChannelContext, ChannelId, ClipboardItem, DraftController, DraftError,
    DraftSettings, DraftSettingsStore, ExistingAttachment, ExistingMessage, FileKind,
    IncomingFile, MessageId, SettingsError, SubmitOutcome, UploadStatus, UserId,
};

const UPLOAD_URL: &str = "https://cdn.example/uploads";

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    EmptySubmit,
    SubmitText,
    UploadKinds,
    UploadFailureRetry,
    PendingGuard,
    PasteAndDrop,
    EditSeed,
    SettingsLoad,
    ConfigAdmission,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "empty_submit" => Some(Self::EmptySubmit),
            "submit_text" => Some(Self::SubmitText),
            "upload_kinds" => Some(Self::UploadKinds),
            "upload_failure_retry" => Some(Self::UploadFailureRetry),
            "pending_guard" => Some(Self::PendingGuard),
            "paste_and_drop" => Some(Self::PasteAndDrop),
            "edit_seed" => Some(Self::EditSeed),
            "settings_load" => Some(Self::SettingsLoad),
            "config_admission" => Some(Self::ConfigAdmission),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::EmptySubmit => "empty_submit",
            Self::SubmitText => "submit_text",
            Self::UploadKinds => "upload_kinds",
            Self::UploadFailureRetry => "upload_failure_retry",
            Self::PendingGuard => "pending_guard",
            Self::PasteAndDrop => "paste_and_drop",
            Self::EditSeed => "edit_seed",
            Self::SettingsLoad => "settings_load",
            Self::ConfigAdmission => "config_admission",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("draft operation failed: {source}"))]
    Draft {
        stage: &'static str,
        source: DraftError,
    },
    #[snafu(display("settings file operation failed: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

struct Harness {
    uploads: Arc<MemoryUploadService>,
    submissions: Arc<MemorySubmissionService>,
    controller: DraftController,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    let store = DraftSettingsStore::new(
        args.config_path.unwrap_or_else(DraftSettingsStore::default_config_path),
    );
    let settings = store.load();
    println!("settings_path={}", store.config_path().display());

    match args.scenario {
        Scenario::EmptySubmit => run_empty_submit(&settings).await,
        Scenario::SubmitText => run_submit_text(&settings).await,
        Scenario::UploadKinds => run_upload_kinds(&settings).await,
        Scenario::UploadFailureRetry => run_upload_failure_retry(&settings).await,
        Scenario::PendingGuard => run_pending_guard(&settings).await,
        Scenario::PasteAndDrop => run_paste_and_drop(&settings).await,
        Scenario::EditSeed => run_edit_seed(&settings).await,
        Scenario::SettingsLoad => run_settings_load(&settings),
        Scenario::ConfigAdmission => run_config_admission().await,
        Scenario::All => run_all(&settings).await,
    }?;

    println!("runner_ok=true");
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut config_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--config" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-config-value",
                    arg: "--config",
                })?;
                config_path = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        config_path,
    })
}

async fn run_all(settings: &DraftSettings) -> RunnerResult<()> {
    run_empty_submit(settings).await?;
    run_submit_text(settings).await?;
    run_upload_kinds(settings).await?;
    run_upload_failure_retry(settings).await?;
    run_pending_guard(settings).await?;
    run_paste_and_drop(settings).await?;
    run_edit_seed(settings).await?;
    run_settings_load(settings)?;
    run_config_admission().await?;
    println!("all_passed=true");
    Ok(())
}

async fn run_empty_submit(settings: &DraftSettings) -> RunnerResult<()> {
    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL), settings)?;

    let outcome = harness.controller.submit().await.context(DraftSnafu {
        stage: "scenario-empty-submit",
    })?;
    let submissions = harness.submissions.submissions().await.len();

    println!("empty_submit_outcome={outcome:?}");
    println!("empty_submit_calls={submissions}");
    check(
        "empty_submit",
        outcome == SubmitOutcome::Skipped && submissions == 0,
        "empty draft reached the submission service",
    )
}

async fn run_submit_text(settings: &DraftSettings) -> RunnerResult<()> {
    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL), settings)?;
    harness.controller.set_text("Some text");

    let outcome = harness.controller.submit().await.context(DraftSnafu {
        stage: "scenario-submit-text",
    })?;
    let submissions = harness.submissions.submissions().await;

    println!("submit_text_outcome={outcome:?}");
    println!("submit_text_calls={}", submissions.len());
    check(
        "submit_text",
        outcome == SubmitOutcome::Sent
            && submissions.len() == 1
            && submissions[0].payload.text == "Some text"
            && harness.controller.draft().is_empty(),
        "text was not submitted exactly once",
    )
}

async fn run_upload_kinds(settings: &DraftSettings) -> RunnerResult<()> {
    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL), settings)?;
    let image = harness
        .controller
        .receive_file(IncomingFile::new("chucknorris.png", "image/png", "(⌐□_□)"))
        .context(DraftSnafu {
            stage: "scenario-upload-kinds-image",
        })?;
    let file = harness
        .controller
        .receive_file(IncomingFile::new("some.txt", "text/plain", "content"))
        .context(DraftSnafu {
            stage: "scenario-upload-kinds-file",
        })?;
    harness.controller.settle().await;

    let requests = harness.uploads.requests().await;
    let kind_of = |filename: &str| {
        requests
            .iter()
            .find(|request| request.filename == filename)
            .map(|request| request.kind)
    };
    let url_of = |local_id| {
        harness
            .controller
            .attachment(local_id)
            .and_then(|attachment| attachment.remote_url.clone())
    };

    let kinds_ok = kind_of("chucknorris.png") == Some(FileKind::Image)
        && kind_of("some.txt") == Some(FileKind::File);
    let urls_ok = url_of(image).as_deref() == Some("https://cdn.example/uploads/chucknorris.png")
        && url_of(file).as_deref() == Some("https://cdn.example/uploads/some.txt");

    println!("upload_kinds_ok={kinds_ok}");
    println!("upload_urls_ok={urls_ok}");
    check(
        "upload_kinds",
        kinds_ok && urls_ok,
        "uploads were tagged or resolved incorrectly",
    )
}

async fn run_upload_failure_retry(settings: &DraftSettings) -> RunnerResult<()> {
    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL), settings)?;
    harness.uploads.fail_times("flaky.txt", 1).await;

    let healthy = harness
        .controller
        .receive_file(IncomingFile::new("ok.txt", "text/plain", "ok"))
        .context(DraftSnafu {
            stage: "scenario-upload-failure-healthy",
        })?;
    let flaky = harness
        .controller
        .receive_file(IncomingFile::new("flaky.txt", "text/plain", "flaky"))
        .context(DraftSnafu {
            stage: "scenario-upload-failure-flaky",
        })?;
    let updates = harness.controller.settle().await;

    let failed_notice = updates.iter().find_map(|update| match update {
        AttachmentUpdate::Failed { local_id, notice } if *local_id == flaky => Some(notice.clone()),
        _ => None,
    });
    println!("upload_failure_notice={failed_notice:?}");

    let isolated = status_of(&harness, healthy) == Some(UploadStatus::Uploaded)
        && status_of(&harness, flaky) == Some(UploadStatus::Failed);

    harness.controller.retry_upload(flaky).context(DraftSnafu {
        stage: "scenario-upload-failure-retry",
    })?;
    harness.controller.settle().await;
    let recovered = status_of(&harness, flaky) == Some(UploadStatus::Uploaded);

    println!("upload_failure_isolated={isolated}");
    println!("upload_retry_recovered={recovered}");
    check(
        "upload_failure_retry",
        failed_notice.is_some() && isolated && recovered,
        "upload failure was not isolated or retry did not recover",
    )
}

async fn run_pending_guard(settings: &DraftSettings) -> RunnerResult<()> {
    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL).held(), settings)?;
    harness.controller.set_text("with attachment");
    harness
        .controller
        .receive_file(IncomingFile::new("some.txt", "text/plain", "content"))
        .context(DraftSnafu {
            stage: "scenario-pending-guard-receive",
        })?;

    let refused = matches!(
        harness.controller.submit().await,
        Err(DraftError::UploadsPending { .. })
    );

    harness.uploads.release(1);
    harness.controller.settle().await;
    let outcome = harness.controller.submit().await.context(DraftSnafu {
        stage: "scenario-pending-guard-submit",
    })?;
    let submissions = harness.submissions.submissions().await;

    println!("pending_guard_refused={refused}");
    println!("pending_guard_outcome={outcome:?}");
    check(
        "pending_guard",
        refused
            && outcome == SubmitOutcome::Sent
            && submissions.len() == 1
            && submissions[0].payload.attachments.len() == 1,
        "submit did not wait for in-flight uploads",
    )
}

async fn run_paste_and_drop(settings: &DraftSettings) -> RunnerResult<()> {
    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL), settings)?;

    let pasted = harness.controller.paste(vec![
        ClipboardItem::Text("look: ".to_string()),
        ClipboardItem::File(IncomingFile::new("pasted.png", "image/png", "png")),
    ]);
    let dropped = harness.controller.receive_files(vec![
        IncomingFile::new("dropped.txt", "text/plain", "txt"),
        IncomingFile::new("dropped.png", "image/png", "png"),
    ]);
    harness.controller.insert_text("💯");
    harness.controller.settle().await;

    let admitted = pasted.admitted.len() + dropped.admitted.len();
    let all_uploaded = harness
        .controller
        .attachments()
        .iter()
        .all(|attachment| attachment.status == UploadStatus::Uploaded);

    println!("paste_drop_admitted={admitted}");
    println!("paste_drop_text={}", harness.controller.text());
    check(
        "paste_and_drop",
        admitted == 3 && all_uploaded && harness.controller.text() == "look: 💯",
        "paste or drop did not produce the expected draft",
    )
}

async fn run_edit_seed(settings: &DraftSettings) -> RunnerResult<()> {
    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL), settings)?;
    let message_id = MessageId::parse("msg-1").context(DraftSnafu {
        stage: "scenario-edit-seed-id",
    })?;
    harness.controller.load_for_edit(&ExistingMessage {
        id: message_id.clone(),
        text: "edited".to_string(),
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
        ],
    });

    let files = count_kind(&harness, FileKind::File);
    let images = count_kind(&harness, FileKind::Image);
    let outcome = harness.controller.submit().await.context(DraftSnafu {
        stage: "scenario-edit-seed-submit",
    })?;
    let submissions = harness.submissions.submissions().await;

    println!("edit_seed_files={files}");
    println!("edit_seed_images={images}");
    check(
        "edit_seed",
        files == 1
            && images == 1
            && outcome == SubmitOutcome::Edited
            && submissions.len() == 1
            && submissions[0].edited.as_ref() == Some(&message_id)
            && submissions[0].payload.attachments.len() == 2,
        "edit seeding or edit submission misbehaved",
    )
}

fn run_settings_load(settings: &DraftSettings) -> RunnerResult<()> {
    println!("settings_max_number_of_files={}", settings.max_number_of_files);
    println!("settings_max_file_size_bytes={:?}", settings.max_file_size_bytes);
    println!("settings_accepted_mime_types={:?}", settings.accepted_mime_types);
    println!("settings_files_enabled={}", settings.files_enabled);
    println!("settings_multiple_uploads={}", settings.multiple_uploads);
    check(
        "settings_load",
        settings.max_number_of_files >= 1,
        "loaded settings allow no files at all",
    )
}

async fn run_config_admission() -> RunnerResult<()> {
    let config_dir = env::temp_dir().join(format!("zova-draft-qa-{}", uuid::Uuid::now_v7()));
    let store = DraftSettingsStore::new(config_dir.join("draft.json"));
    store
        .save(&DraftSettings {
            files_enabled: false,
            ..DraftSettings::default()
        })
        .context(SettingsSnafu {
            stage: "scenario-config-admission-save",
        })?;
    let settings = store.load();
    let _ = std::fs::remove_dir_all(&config_dir);

    let mut harness = harness(MemoryUploadService::new(UPLOAD_URL), &settings)?;
    let text_rejected = matches!(
        harness
            .controller
            .receive_file(IncomingFile::new("notes.txt", "text/plain", "notes")),
        Err(DraftError::FilesDisabled { .. })
    );
    let image_admitted = harness
        .controller
        .receive_file(IncomingFile::new("photo.png", "image/png", "png"))
        .is_ok();
    harness.controller.settle().await;

    println!("config_admission_files_enabled={}", settings.files_enabled);
    println!("config_admission_text_rejected={text_rejected}");
    println!("config_admission_image_admitted={image_admitted}");
    check(
        "config_admission",
        !settings.files_enabled
            && text_rejected
            && image_admitted
            && harness.controller.attachments().len() == 1,
        "saved config did not change which files are admitted",
    )
}

fn harness(uploads: MemoryUploadService, settings: &DraftSettings) -> RunnerResult<Harness> {
    let uploads = Arc::new(uploads);
    let submissions = Arc::new(MemorySubmissionService::new());
    let channel = ChannelContext::new(
        ChannelId::parse("messaging:qa").context(DraftSnafu {
            stage: "harness-channel-id",
        })?,
        UserId::parse("qa-runner").context(DraftSnafu {
            stage: "harness-user-id",
        })?,
    );
    let controller = DraftController::new(channel, uploads.clone(), submissions.clone())
        .context(DraftSnafu {
            stage: "harness-controller",
        })?
        .with_settings(settings.clone());

    Ok(Harness {
        uploads,
        submissions,
        controller,
    })
}

fn status_of(harness: &Harness, local_id: zova_draft::LocalId) -> Option<UploadStatus> {
    harness
        .controller
        .attachment(local_id)
        .map(|attachment| attachment.status.clone())
}

fn count_kind(harness: &Harness, kind: FileKind) -> usize {
    harness
        .controller
        .attachments()
        .iter()
        .filter(|attachment| attachment.kind == kind)
        .count()
}

fn check(scenario: &'static str, passed: bool, reason: &str) -> RunnerResult<()> {
    if passed {
        return Ok(());
    }

    ScenarioFailedSnafu {
        stage: "scenario-check",
        scenario,
        reason: reason.to_string(),
    }
    .fail()
}
