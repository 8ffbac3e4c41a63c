use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use super::types::FileKind;

pub const SETTINGS_DIRECTORY_NAME: &str = "zova";
pub const SETTINGS_FILE_NAME: &str = "draft.json";
pub const DEFAULT_MAX_NUMBER_OF_FILES: usize = 10;
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSettings {
    #[serde(default = "default_max_number_of_files")]
    pub max_number_of_files: usize,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: Option<u64>,
    /// Empty accepts everything. Entries are exact types or `type/*` wildcards.
    #[serde(default)]
    pub accepted_mime_types: Vec<String>,
    #[serde(default = "default_true")]
    pub files_enabled: bool,
    #[serde(default = "default_true")]
    pub multiple_uploads: bool,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self {
            max_number_of_files: default_max_number_of_files(),
            max_file_size_bytes: default_max_file_size_bytes(),
            accepted_mime_types: Vec::new(),
            files_enabled: true,
            multiple_uploads: true,
        }
    }
}

impl DraftSettings {
    pub fn normalized(mut self) -> Self {
        self.max_number_of_files = self.max_number_of_files.max(1);
        self.accepted_mime_types = self
            .accepted_mime_types
            .into_iter()
            .map(|pattern| pattern.trim().to_ascii_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        self
    }

    pub fn accepts_mime_type(&self, mime_type: &str) -> bool {
        if self.accepted_mime_types.is_empty() {
            return true;
        }

        let mime_type = mime_type.trim().to_ascii_lowercase();
        self.accepted_mime_types.iter().any(|pattern| {
            match pattern.strip_suffix("/*") {
                Some(prefix) => mime_type
                    .split_once('/')
                    .is_some_and(|(top_level, _)| top_level == prefix),
                None => *pattern == mime_type,
            }
        })
    }

    pub fn accepts_kind(&self, kind: FileKind) -> bool {
        self.files_enabled || kind == FileKind::Image
    }
}

/// Reads and writes the draft limits file (`<config dir>/zova/draft.json`).
pub struct DraftSettingsStore {
    config_path: PathBuf,
}

impl DraftSettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".zova"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Limits for a new controller. An absent or unreadable file means the built-in limits.
    pub fn load(&self) -> DraftSettings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                tracing::debug!(path = %self.config_path.display(), "no draft limits file");
                DraftSettings::default()
            }
            Err(error) => {
                tracing::warn!(
                    path = %self.config_path.display(),
                    %error,
                    "ignoring draft limits file"
                );
                DraftSettings::default()
            }
        }
    }

    /// Like [`Self::load`], but reports a file that exists and does not parse.
    pub fn try_load(&self) -> Result<Option<DraftSettings>, SettingsError> {
        if !self.config_path.is_file() {
            return Ok(None);
        }

        Figment::from(Serialized::defaults(DraftSettings::default()))
            .merge(Json::file(&self.config_path))
            .extract::<DraftSettings>()
            .map(|settings| Some(settings.normalized()))
            .context(ParseLimitsSnafu {
                stage: "extract-draft-limits",
                path: self.config_path.clone(),
            })
    }

    /// Staged next to the target, then renamed into place.
    pub fn save(&self, settings: &DraftSettings) -> Result<(), SettingsError> {
        let encoded = serde_json::to_vec_pretty(settings).context(EncodeLimitsSnafu {
            stage: "encode-draft-limits",
        })?;

        if let Some(directory) = self.config_path.parent() {
            std::fs::create_dir_all(directory).context(ConfigDirectorySnafu {
                stage: "ensure-draft-config-directory",
                path: directory.to_path_buf(),
            })?;
        }

        let staged_path = self.config_path.with_extension("json.partial");
        std::fs::write(&staged_path, encoded).context(StageLimitsSnafu {
            stage: "stage-draft-limits",
            path: staged_path.clone(),
        })?;
        std::fs::rename(&staged_path, &self.config_path).context(PublishLimitsSnafu {
            stage: "publish-draft-limits",
            path: self.config_path.clone(),
        })?;

        tracing::info!(
            path = %self.config_path.display(),
            max_number_of_files = settings.max_number_of_files,
            files_enabled = settings.files_enabled,
            "saved draft limits"
        );
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("draft limits at {path:?} do not parse on `{stage}`: {source}"))]
    ParseLimits {
        stage: &'static str,
        path: PathBuf,
        source: figment::Error,
    },
    #[snafu(display("draft limits could not be encoded on `{stage}`: {source}"))]
    EncodeLimits {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("config directory {path:?} is unavailable on `{stage}`: {source}"))]
    ConfigDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("draft limits could not be staged at {path:?} on `{stage}`: {source}"))]
    StageLimits {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("draft limits could not replace {path:?} on `{stage}`: {source}"))]
    PublishLimits {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_max_number_of_files() -> usize {
    DEFAULT_MAX_NUMBER_OF_FILES
}

fn default_max_file_size_bytes() -> Option<u64> {
    Some(DEFAULT_MAX_FILE_SIZE_BYTES)
}

fn default_true() -> bool {
    true
}
