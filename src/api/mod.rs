use std::{path::Path, sync::Arc};

use chrono::Duration;

use crate::{
    config::{CacheConfig, InvalidConfig},
    error::CacheError,
    fetch::{Checkout, CloneOrchestrator},
    history, lifecycle,
    model::{CachedRepoInfo, CommitRecord, InterestingFile, RepoIdentity, StorageQuota},
    store::ProgressSink,
};

mod builder;

pub use builder::{RepoCacheBuilder, DEFAULT_INTERESTING_EXTENSION};

/// Path predicate deciding which files a scan cares about.
pub type Interesting = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A local cache of remote repositories, addressed as `owner/name`.
pub struct RepoCache {
    orchestrator: CloneOrchestrator,
    interesting: Interesting,
}

impl RepoCache {
    pub fn builder() -> RepoCacheBuilder {
        RepoCacheBuilder::default()
    }

    pub fn cache_directory(&self) -> &Path {
        self.orchestrator.cache_dir()
    }

    pub fn config(&self) -> CacheConfig {
        self.orchestrator.config()
    }

    /// Applies `update` to a copy of the current configuration and installs
    /// it if it is still valid.
    pub fn update_config(
        &self,
        update: impl FnOnce(&mut CacheConfig),
    ) -> Result<(), InvalidConfig> {
        let mut config = self.orchestrator.config();
        update(&mut config);
        self.orchestrator.set_config(config)
    }

    /// Clones the repository unless it is already cached.
    pub async fn ensure(
        &self,
        identity: &str,
        progress: Option<ProgressSink>,
    ) -> Result<Checkout, CacheError> {
        let identity = RepoIdentity::parse(identity)?;
        self.orchestrator.ensure(&identity, progress).await
    }

    /// Newest-first commit history, flagged with the predicate the cache was
    /// built with.
    pub async fn list_commits(
        &self,
        identity: &str,
        max_depth: usize,
    ) -> Result<Vec<CommitRecord>, CacheError> {
        let identity = RepoIdentity::parse(identity)?;
        history::list_commits(
            &self.orchestrator,
            &identity,
            max_depth,
            &*self.interesting,
        )
        .await
    }

    pub async fn get_interesting_files<F>(
        &self,
        identity: &str,
        commit_hash: &str,
        is_interesting: F,
    ) -> Result<Vec<InterestingFile>, CacheError>
    where
        F: Fn(&str) -> bool + Sync,
    {
        let identity = RepoIdentity::parse(identity)?;
        history::get_interesting_files(&self.orchestrator, &identity, commit_hash, &is_interesting)
            .await
    }

    pub async fn get_changed_interesting_files<F>(
        &self,
        identity: &str,
        commit_hash: &str,
        is_interesting: F,
    ) -> Result<Vec<String>, CacheError>
    where
        F: Fn(&str) -> bool + Sync,
    {
        let identity = RepoIdentity::parse(identity)?;
        history::get_changed_interesting_files(
            &self.orchestrator,
            &identity,
            commit_hash,
            &is_interesting,
        )
        .await
    }

    /// Drops one repository from the cache. Only a malformed identity fails.
    pub fn invalidate(&self, identity: &str) -> Result<(), CacheError> {
        let identity = RepoIdentity::parse(identity)?;
        lifecycle::invalidate(&self.orchestrator, &identity);
        Ok(())
    }

    pub fn clear_all(&self) {
        lifecycle::clear_all(&self.orchestrator)
    }

    pub fn list_cached(&self) -> Result<Vec<CachedRepoInfo>, CacheError> {
        lifecycle::list_cached(&self.orchestrator)
    }

    pub fn storage_quota(&self) -> Option<StorageQuota> {
        lifecycle::storage_quota(self.orchestrator.cache_dir())
    }

    /// Drops repositories not used within `max_age`, returning them.
    pub fn prune(&self, max_age: Duration) -> Result<Vec<RepoIdentity>, CacheError> {
        lifecycle::prune(&self.orchestrator, max_age)
    }
}
