use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use uuid::Uuid;

use super::error::{BlankRemoteIdSnafu, DraftError, DraftResult, InvalidLocalIdSnafu};

/// Draft-local attachment identifier.
///
/// Minted per received file and never reused within one controller, so late upload
/// completions can always be matched (or dropped) by id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub Uuid);

impl LocalId {
    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> DraftResult<Self> {
        let parsed = Uuid::parse_str(raw).context(InvalidLocalIdSnafu {
            stage: "parse-local-id",
            raw: raw.to_string(),
        })?;
        Ok(Self(parsed))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<Uuid> for LocalId {
    fn from(value: Uuid) -> Self {
        Self::new(value)
    }
}

impl FromStr for LocalId {
    type Err = DraftError;

    fn from_str(raw: &str) -> DraftResult<Self> {
        Self::parse(raw)
    }
}

// Backend ids are opaque strings; the wrappers only guarantee they are non-blank.
macro_rules! define_remote_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: impl Into<String>) -> DraftResult<Self> {
                let raw = raw.into();
                let trimmed = raw.trim();
                ensure!(
                    !trimmed.is_empty(),
                    BlankRemoteIdSnafu {
                        stage: "parse-remote-id",
                        id_type: $id_type,
                    }
                );
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = DraftError;

            fn from_str(raw: &str) -> DraftResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_remote_id!(ChannelId, "channel-id");
define_remote_id!(MessageId, "message-id");
define_remote_id!(UserId, "user-id");
