use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RepoIdentity;

/// Bookkeeping row for one cached repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub identity: RepoIdentity,
    pub cloned_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntryMetadata {
    pub fn new(identity: RepoIdentity, now: DateTime<Utc>) -> Self {
        CacheEntryMetadata {
            identity,
            cloned_at: now,
            last_accessed: now,
        }
    }
}

/// What `list_cached` reports about a repository.
pub type CachedRepoInfo = CacheEntryMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageQuota {
    pub usage_bytes: u64,
    pub quota_bytes: u64,
    pub usage_percent: f64,
}

impl StorageQuota {
    pub fn new(usage_bytes: u64, quota_bytes: u64) -> Self {
        let usage_percent = if quota_bytes == 0 {
            0.0
        } else {
            usage_bytes as f64 / quota_bytes as f64 * 100.0
        };
        StorageQuota {
            usage_bytes,
            quota_bytes,
            usage_percent,
        }
    }
}
