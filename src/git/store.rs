use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use git2::{
    AutotagOption, Commit, Direction, ErrorClass, ErrorCode, FetchOptions, ObjectType, Oid,
    ProxyOptions, RemoteCallbacks, Repository, Sort,
};
use log::{debug, trace};

use crate::store::{
    CloneProgress, CloneRequest, CommitObject, ObjectStore, TransportError, TreeEntry,
};

/// [`ObjectStore`] over bare libgit2 repositories on the local disk.
///
/// libgit2 is synchronous, so every call runs on the blocking thread pool.
#[derive(Debug, Default, Clone)]
pub struct GitObjectStore {}

impl GitObjectStore {
    pub fn new() -> Self {
        GitObjectStore {}
    }
}

async fn blocking<T, F>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|error| TransportError::Other(format!("git task failed: {error}")))?
}

/// The single translation point from libgit2 failures to transport kinds.
pub(crate) fn classify(error: git2::Error) -> TransportError {
    let message = error.message().to_owned();
    match (error.code(), error.class()) {
        (ErrorCode::NotFound | ErrorCode::UnbornBranch, _) => TransportError::NotFound(message),
        // Hosts ask for credentials instead of admitting a private repository exists.
        (ErrorCode::Auth, _) => TransportError::NotFound(message),
        (_, ErrorClass::Http) if message.contains("404") => TransportError::NotFound(message),
        (ErrorCode::Certificate, _)
        | (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh) => {
            TransportError::Network(message)
        }
        _ => TransportError::Other(message),
    }
}

fn open(dir: &Path) -> Result<Repository, TransportError> {
    if !dir.exists() {
        return Err(TransportError::NotFound(format!(
            "no repository at {}",
            dir.display()
        )));
    }
    Repository::open(dir).map_err(classify)
}

fn parse_oid(oid: &str) -> Result<Oid, TransportError> {
    Oid::from_str(oid).map_err(|_| TransportError::NotFound(format!("invalid object id {oid}")))
}

fn commit_object(commit: &Commit<'_>) -> CommitObject {
    CommitObject {
        oid: commit.id().to_string(),
        author_timestamp_seconds: commit.author().when().seconds(),
        message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        tree_id: commit.tree_id().to_string(),
        parents: commit.parent_ids().map(|oid| oid.to_string()).collect(),
    }
}

fn proxy_options(proxy: Option<&str>) -> ProxyOptions<'static> {
    let mut options = ProxyOptions::new();
    if let Some(url) = proxy {
        options.url(url);
    }
    options
}

/// Raised when the awaiting future is dropped, which aborts the transfer at
/// the next progress callback.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn clone_blocking(request: CloneRequest, cancelled: &AtomicBool) -> Result<(), TransportError> {
    let CloneRequest {
        dir,
        url,
        depth,
        single_branch,
        no_tags,
        proxy,
        on_progress,
    } = request;

    std::fs::create_dir_all(&dir).map_err(|error| TransportError::Other(error.to_string()))?;
    trace!("Creating a new repository at {}", dir.display());
    let repo = Repository::init_bare(&dir).map_err(classify)?;

    let branch = {
        let mut remote = repo.remote_anonymous(&url).map_err(classify)?;
        let connection = remote
            .connect_auth(Direction::Fetch, None, Some(proxy_options(proxy.as_deref())))
            .map_err(classify)?;
        let branch = connection.default_branch().map_err(classify)?;
        branch
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| TransportError::Other("default branch is not valid UTF-8".to_owned()))?
    };
    debug!("Default branch of {} is {}", url, branch);

    let refspec = if single_branch {
        format!("+{branch}:{branch}")
    } else {
        "+refs/heads/*:refs/heads/*".to_owned()
    };
    let mut remote = repo
        .remote_with_fetch("origin", &url, &refspec)
        .map_err(classify)?;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(|stats| {
        if cancelled.load(Ordering::Relaxed) {
            return false;
        }
        if let Some(sink) = &on_progress {
            let progress = if stats.received_objects() < stats.total_objects() {
                CloneProgress {
                    phase: "Receiving objects".to_owned(),
                    loaded: stats.received_objects(),
                    total: Some(stats.total_objects()),
                }
            } else {
                CloneProgress {
                    phase: "Resolving deltas".to_owned(),
                    loaded: stats.indexed_deltas(),
                    total: Some(stats.total_deltas()),
                }
            };
            sink(progress);
        }
        true
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options
        .remote_callbacks(callbacks)
        .proxy_options(proxy_options(proxy.as_deref()))
        .download_tags(if no_tags {
            AutotagOption::None
        } else {
            AutotagOption::All
        });
    if depth > 0 {
        fetch_options.depth(i32::try_from(depth).unwrap_or(i32::MAX));
    }

    remote
        .fetch(&[refspec.as_str()], Some(&mut fetch_options), None)
        .map_err(classify)?;
    repo.set_head(&branch).map_err(classify)?;
    Ok(())
}

#[async_trait]
impl ObjectStore for GitObjectStore {
    async fn resolve_ref(&self, dir: &Path, reference: &str) -> Result<String, TransportError> {
        let dir = dir.to_owned();
        let reference = reference.to_owned();
        blocking(move || {
            let repo = open(&dir)?;
            let commit = repo
                .revparse_single(&reference)
                .and_then(|object| object.peel_to_commit())
                .map_err(classify)?;
            Ok(commit.id().to_string())
        })
        .await
    }

    async fn clone_repository(&self, request: CloneRequest) -> Result<(), TransportError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel = CancelOnDrop(cancelled.clone());
        blocking(move || clone_blocking(request, &cancelled)).await
    }

    async fn log(&self, dir: &Path, depth: usize) -> Result<Vec<CommitObject>, TransportError> {
        let dir: PathBuf = dir.to_owned();
        blocking(move || {
            let repo = open(&dir)?;
            let mut revwalk = repo.revwalk().map_err(classify)?;
            revwalk.set_sorting(Sort::TOPOLOGICAL).map_err(classify)?;
            revwalk.push_head().map_err(classify)?;
            revwalk.simplify_first_parent().map_err(classify)?;

            revwalk
                .take(depth)
                .map(|oid| {
                    let commit = repo.find_commit(oid.map_err(classify)?).map_err(classify)?;
                    Ok(commit_object(&commit))
                })
                .collect()
        })
        .await
    }

    async fn read_commit(&self, dir: &Path, oid: &str) -> Result<CommitObject, TransportError> {
        let dir = dir.to_owned();
        let oid = oid.to_owned();
        blocking(move || {
            let repo = open(&dir)?;
            let commit = repo
                .revparse_single(&oid)
                .and_then(|object| object.peel_to_commit())
                .map_err(|error| match error.code() {
                    ErrorCode::InvalidSpec | ErrorCode::Ambiguous | ErrorCode::Peel => {
                        TransportError::NotFound(format!("{oid}: {}", error.message()))
                    }
                    _ => classify(error),
                })?;
            Ok(commit_object(&commit))
        })
        .await
    }

    async fn read_tree(&self, dir: &Path, tree_id: &str) -> Result<Vec<TreeEntry>, TransportError> {
        let dir = dir.to_owned();
        let tree_id = tree_id.to_owned();
        blocking(move || {
            let repo = open(&dir)?;
            let tree = repo.find_tree(parse_oid(&tree_id)?).map_err(classify)?;
            let entries = tree
                .iter()
                .filter_map(|entry| {
                    let path = String::from_utf8_lossy(entry.name_bytes()).into_owned();
                    let oid = entry.id().to_string();
                    match entry.kind() {
                        Some(ObjectType::Blob) => Some(TreeEntry::blob(path, oid)),
                        Some(ObjectType::Tree) => Some(TreeEntry::tree(path, oid)),
                        // Submodule commits live in another repository.
                        _ => None,
                    }
                })
                .collect();
            Ok(entries)
        })
        .await
    }

    async fn read_blob(&self, dir: &Path, oid: &str) -> Result<Vec<u8>, TransportError> {
        let dir = dir.to_owned();
        let oid = oid.to_owned();
        blocking(move || {
            let repo = open(&dir)?;
            let blob = repo.find_blob(parse_oid(&oid)?).map_err(classify)?;
            Ok(blob.content().to_vec())
        })
        .await
    }
}
