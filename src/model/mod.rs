pub mod cache;
pub mod history;
pub mod identity;

pub use cache::{CacheEntryMetadata, CachedRepoInfo, StorageQuota};
pub use history::{Change, ChangeKind, ChangeSet, CommitRecord, InterestingFile};
pub use identity::RepoIdentity;
