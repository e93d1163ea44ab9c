use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
    sync::LazyLock,
};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub const MAX_SEGMENT_LENGTH: usize = 100;

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

/// A validated `owner/name` pair naming a remote repository.
///
/// The only way to obtain one is [`RepoIdentity::parse`], so every identity
/// that reaches the network or the disk has already been sanitized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoIdentity {
    owner: String,
    name: String,
}

impl RepoIdentity {
    pub fn parse(raw: &str) -> Result<RepoIdentity, CacheError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CacheError::invalid_repo(raw, "repository is empty"));
        }

        let segments: Vec<&str> = trimmed.split('/').collect();
        let [owner, name] = segments.as_slice() else {
            return Err(CacheError::invalid_repo(
                raw,
                "expected exactly one `/` between owner and name",
            ));
        };

        Ok(RepoIdentity {
            owner: validate_segment(raw, "owner", owner)?,
            name: validate_segment(raw, "name", name)?,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location of this repository relative to the object-store root.
    pub fn to_path(&self) -> PathBuf {
        let mut result = PathBuf::new();

        result.push(&self.owner);
        result.push(&self.name);

        result
    }

    pub fn to_git_url(&self, remote_base_url: &str) -> String {
        format!(
            "{}/{}/{}",
            remote_base_url.trim_end_matches('/'),
            self.owner,
            self.name
        )
    }
}

fn validate_segment(raw: &str, label: &str, segment: &str) -> Result<String, CacheError> {
    if segment.is_empty() {
        return Err(CacheError::invalid_repo(raw, format!("{label} is empty")));
    }
    if segment.len() > MAX_SEGMENT_LENGTH {
        return Err(CacheError::invalid_repo(
            raw,
            format!("{label} is longer than {MAX_SEGMENT_LENGTH} characters"),
        ));
    }
    if !SEGMENT.is_match(segment) {
        return Err(CacheError::invalid_repo(
            raw,
            format!("{label} may only contain letters, digits, `.`, `_` and `-`"),
        ));
    }
    // Would escape the working directory once joined onto the store root.
    if segment == "." || segment == ".." {
        return Err(CacheError::invalid_repo(
            raw,
            format!("{label} cannot be `{segment}`"),
        ));
    }
    Ok(segment.to_owned())
}

impl Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoIdentity {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepoIdentity::parse(s)
    }
}

impl TryFrom<String> for RepoIdentity {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RepoIdentity::parse(&value)
    }
}

impl From<RepoIdentity> for String {
    fn from(value: RepoIdentity) -> Self {
        value.to_string()
    }
}
