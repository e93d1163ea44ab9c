//! In-memory doubles for the object store and the metadata store.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::StoreError,
    metadata::{sort_most_recent_first, MetadataStore},
    model::{CacheEntryMetadata, RepoIdentity},
    store::{
        CloneProgress, CloneRequest, CommitObject, ObjectStore, TransportError, TreeEntry,
    },
};

const HEAD_FILE: &str = "HEAD";

#[derive(Debug, Clone)]
pub(crate) enum CloneBehaviour {
    Succeed,
    /// Succeeds after sleeping, so that concurrent callers overlap.
    SucceedAfter(Duration),
    /// Leaves a partial working directory behind, then fails.
    Fail(TransportError),
    /// Leaves a partial working directory behind and never finishes.
    Hang,
}

#[derive(Default)]
struct Objects {
    trees: HashMap<String, Vec<TreeEntry>>,
    blobs: HashMap<String, Vec<u8>>,
    commits: HashMap<String, CommitObject>,
    head: Option<String>,
}

/// A single remote repository that every clone copies.
///
/// Object ids are derived from content, so identical snapshots share ids
/// exactly like a real content-addressed store.
pub(crate) struct MemoryObjectStore {
    objects: Mutex<Objects>,
    behaviour: Mutex<CloneBehaviour>,
    requests: Mutex<Vec<CloneRequest>>,
    clone_calls: AtomicUsize,
    read_tree_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MemoryObjectStore {
            objects: Mutex::new(Objects::default()),
            behaviour: Mutex::new(CloneBehaviour::Succeed),
            requests: Mutex::new(Vec::new()),
            clone_calls: AtomicUsize::new(0),
            read_tree_calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_behaviour(&self, behaviour: CloneBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub(crate) fn clone_calls(&self) -> usize {
        self.clone_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn read_tree_calls(&self) -> usize {
        self.read_tree_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<CloneRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Stores `(path, contents)` files as trees and blobs, returning the root
    /// tree id.
    pub(crate) fn snapshot(&self, files: &[(&str, &str)]) -> String {
        let mut nested: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        let mut entries = Vec::new();
        for (path, contents) in files {
            match path.split_once('/') {
                Some((directory, rest)) => nested
                    .entry(directory.to_owned())
                    .or_default()
                    .push((rest.to_owned(), (*contents).to_owned())),
                None => {
                    let oid = format!("blob:{contents}");
                    self.objects
                        .lock()
                        .unwrap()
                        .blobs
                        .insert(oid.clone(), contents.as_bytes().to_vec());
                    entries.push(TreeEntry::blob(*path, oid));
                }
            }
        }
        for (directory, files) in nested {
            let files: Vec<(&str, &str)> = files
                .iter()
                .map(|(path, contents)| (path.as_str(), contents.as_str()))
                .collect();
            entries.push(TreeEntry::tree(directory, self.snapshot(&files)));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let oid = format!(
            "tree({})",
            entries
                .iter()
                .map(|entry| format!("{}={}", entry.path, entry.oid))
                .collect::<Vec<_>>()
                .join(",")
        );
        self.objects
            .lock()
            .unwrap()
            .trees
            .insert(oid.clone(), entries);
        oid
    }

    /// Commits a snapshot on top of the current head and returns its id.
    pub(crate) fn commit(&self, files: &[(&str, &str)], message: &str, seconds: i64) -> String {
        let tree_id = self.snapshot(files);
        let mut objects = self.objects.lock().unwrap();
        let oid = format!("c{:039}", objects.commits.len() + 1);
        let commit = CommitObject {
            oid: oid.clone(),
            author_timestamp_seconds: seconds,
            message: message.to_owned(),
            tree_id,
            parents: objects.head.iter().cloned().collect(),
        };
        objects.commits.insert(oid.clone(), commit);
        objects.head = Some(oid.clone());
        oid
    }

    fn cloned_head(dir: &Path) -> Result<String, TransportError> {
        std::fs::read_to_string(dir.join(HEAD_FILE))
            .map_err(|_| TransportError::NotFound(format!("no clone at {}", dir.display())))
    }

    fn commit_object(&self, oid: &str) -> Result<CommitObject, TransportError> {
        self.objects
            .lock()
            .unwrap()
            .commits
            .get(oid)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("commit {oid}")))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn resolve_ref(&self, dir: &Path, _reference: &str) -> Result<String, TransportError> {
        Self::cloned_head(dir)
    }

    async fn clone_repository(&self, request: CloneRequest) -> Result<(), TransportError> {
        self.clone_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let behaviour = self.behaviour.lock().unwrap().clone();

        std::fs::create_dir_all(&request.dir).unwrap();
        std::fs::write(request.dir.join("partial.pack"), b"...").unwrap();
        if let Some(sink) = &request.on_progress {
            sink(CloneProgress {
                phase: "Receiving objects".to_owned(),
                loaded: 1,
                total: Some(2),
            });
        }

        match behaviour {
            CloneBehaviour::Succeed => {}
            CloneBehaviour::SucceedAfter(delay) => tokio::time::sleep(delay).await,
            CloneBehaviour::Fail(error) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                return Err(error);
            }
            CloneBehaviour::Hang => std::future::pending::<()>().await,
        }

        let head = self.objects.lock().unwrap().head.clone().unwrap_or_default();
        std::fs::write(request.dir.join(HEAD_FILE), head).unwrap();
        Ok(())
    }

    async fn log(&self, dir: &Path, depth: usize) -> Result<Vec<CommitObject>, TransportError> {
        let mut next = Some(Self::cloned_head(dir)?);
        let mut commits = Vec::new();
        while let Some(oid) = next.take() {
            if commits.len() == depth {
                break;
            }
            let commit = self.commit_object(&oid)?;
            next = commit.parents.first().cloned();
            commits.push(commit);
        }
        Ok(commits)
    }

    async fn read_commit(&self, dir: &Path, oid: &str) -> Result<CommitObject, TransportError> {
        Self::cloned_head(dir)?;
        self.commit_object(oid)
    }

    async fn read_tree(
        &self,
        _dir: &Path,
        tree_id: &str,
    ) -> Result<Vec<TreeEntry>, TransportError> {
        self.read_tree_calls.fetch_add(1, Ordering::SeqCst);
        // Yield like real I/O would.
        tokio::task::yield_now().await;
        self.objects
            .lock()
            .unwrap()
            .trees
            .get(tree_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("tree {tree_id}")))
    }

    async fn read_blob(&self, _dir: &Path, oid: &str) -> Result<Vec<u8>, TransportError> {
        self.objects
            .lock()
            .unwrap()
            .blobs
            .get(oid)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("blob {oid}")))
    }
}

#[derive(Default)]
pub(crate) struct MemoryMetadataStore {
    rows: Mutex<Vec<CacheEntryMetadata>>,
}

impl MemoryMetadataStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get(&self, identity: &RepoIdentity) -> Result<Option<CacheEntryMetadata>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| &row.identity == identity)
            .cloned())
    }

    fn put(&self, entry: CacheEntryMetadata) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|row| row.identity != entry.identity);
        rows.push(entry);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<CacheEntryMetadata>, StoreError> {
        let mut rows = self.rows.lock().unwrap().clone();
        sort_most_recent_first(&mut rows);
        Ok(rows)
    }

    fn delete(&self, identity: &RepoIdentity) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap()
            .retain(|row| &row.identity != identity);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}

/// Reads fine, but every write hits a full disk.
#[derive(Default)]
pub(crate) struct QuotaExceededMetadataStore {
    pub(crate) put_attempts: AtomicUsize,
}

impl MetadataStore for QuotaExceededMetadataStore {
    fn get(&self, _identity: &RepoIdentity) -> Result<Option<CacheEntryMetadata>, StoreError> {
        Ok(None)
    }

    fn put(&self, _entry: CacheEntryMetadata) -> Result<(), StoreError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::QuotaExceeded, "quota exceeded").into())
    }

    fn list_all(&self) -> Result<Vec<CacheEntryMetadata>, StoreError> {
        Ok(Vec::new())
    }

    fn delete(&self, _identity: &RepoIdentity) -> Result<(), StoreError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
