//! Eviction and reporting over the whole cache.
//!
//! Everything here is best-effort: a repository that cannot be removed is
//! logged and skipped so that the remaining ones still are.

use std::{io, path::Path};

use chrono::{Duration, Utc};
use log::{debug, info, warn};

use crate::{
    error::CacheError,
    fetch::{remove_working_dir, CloneOrchestrator},
    model::{CachedRepoInfo, RepoIdentity, StorageQuota},
};

/// Forgets one repository: its working directory and its metadata row.
/// Unknown identities are a no-op.
pub fn invalidate(orchestrator: &CloneOrchestrator, identity: &RepoIdentity) {
    let dir = orchestrator.working_dir_path(identity);
    match remove_working_dir(&dir) {
        Ok(()) => debug!("Removed working directory of {}", identity),
        Err(error) => warn!("Could not remove {}: {}", dir.display(), error),
    }
    if let Err(error) = orchestrator.metadata().delete(identity) {
        warn!("Could not delete metadata of {}: {}", identity, error);
    }
    info!("Invalidated {}", identity);
}

/// Removes every cached repository and then the object store itself.
pub fn clear_all(orchestrator: &CloneOrchestrator) {
    let entries = orchestrator.metadata().list_all().unwrap_or_else(|error| {
        warn!("Could not list cached repositories: {}", error);
        Vec::new()
    });
    for entry in &entries {
        invalidate(orchestrator, &entry.identity);
    }
    if let Err(error) = orchestrator.metadata().clear() {
        warn!("Could not clear the metadata store: {}", error);
    }
    if let Err(error) = orchestrator.destroy_store() {
        warn!("Could not delete the object store: {}", error);
    }
    info!("Cleared {} cached repositories", entries.len());
}

/// Invalidates every repository not accessed within `max_age` and returns
/// the ones it removed.
pub fn prune(
    orchestrator: &CloneOrchestrator,
    max_age: Duration,
) -> Result<Vec<RepoIdentity>, CacheError> {
    let cutoff = Utc::now() - max_age;
    let stale: Vec<RepoIdentity> = orchestrator
        .metadata()
        .list_all()?
        .into_iter()
        .filter(|entry| entry.last_accessed < cutoff)
        .map(|entry| entry.identity)
        .collect();
    for identity in &stale {
        invalidate(orchestrator, identity);
    }
    info!(
        "Pruned {} repositories not used since {}",
        stale.len(),
        cutoff
    );
    Ok(stale)
}

/// Cached repositories, most recently used first.
pub fn list_cached(orchestrator: &CloneOrchestrator) -> Result<Vec<CachedRepoInfo>, CacheError> {
    Ok(orchestrator.metadata().list_all()?)
}

/// Bytes used by the cache against what it could grow to on its filesystem,
/// or `None` when the filesystem cannot be queried.
pub fn storage_quota(cache_dir: &Path) -> Option<StorageQuota> {
    let usage = match directory_size(cache_dir) {
        Ok(usage) => usage,
        Err(error) => {
            warn!("Could not measure {}: {}", cache_dir.display(), error);
            return None;
        }
    };
    // The cache directory may not exist yet; ask the nearest ancestor that does.
    let probe = cache_dir.ancestors().find(|path| path.exists())?;
    match fs4::available_space(probe) {
        Ok(available) => Some(StorageQuota::new(usage, usage.saturating_add(available))),
        Err(error) => {
            warn!(
                "Could not query free space of {}: {}",
                probe.display(),
                error
            );
            None
        }
    }
}

fn directory_size(root: &Path) -> io::Result<u64> {
    let mut total = 0;
    let mut work = vec![root.to_owned()];
    while let Some(dir) = work.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
            Err(error) => return Err(error),
        };
        for entry in entries {
            let entry = entry?;
            let metadata = entry.path().symlink_metadata()?;
            if metadata.is_dir() {
                work.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}
