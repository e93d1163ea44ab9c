//! The git object store and transport this cache is layered over.
//!
//! Working directories are addressed by absolute path. Implementations own
//! everything below that path; the cache only decides where it lives and when
//! it is thrown away.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use thiserror::Error;

/// Failures reported by an [`ObjectStore`], already classified at the
/// implementation boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Blob,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// A single path segment, never containing `/`.
    pub path: String,
    pub oid: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, oid: impl Into<String>) -> Self {
        TreeEntry {
            path: path.into(),
            oid: oid.into(),
            kind: EntryKind::Blob,
        }
    }

    pub fn tree(path: impl Into<String>, oid: impl Into<String>) -> Self {
        TreeEntry {
            path: path.into(),
            oid: oid.into(),
            kind: EntryKind::Tree,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitObject {
    pub oid: String,
    pub author_timestamp_seconds: i64,
    pub message: String,
    pub tree_id: String,
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneProgress {
    pub phase: String,
    pub loaded: usize,
    pub total: Option<usize>,
}

pub type ProgressSink = Arc<dyn Fn(CloneProgress) + Send + Sync>;

#[derive(Clone)]
pub struct CloneRequest {
    pub dir: PathBuf,
    pub url: String,
    pub depth: usize,
    pub single_branch: bool,
    pub no_tags: bool,
    pub proxy: Option<String>,
    pub on_progress: Option<ProgressSink>,
}

impl Debug for CloneRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneRequest")
            .field("dir", &self.dir)
            .field("url", &self.url)
            .field("depth", &self.depth)
            .field("single_branch", &self.single_branch)
            .field("no_tags", &self.no_tags)
            .field("proxy", &self.proxy)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resolves a reference to a commit id. A missing working directory or
    /// an unborn `HEAD` is [`TransportError::NotFound`].
    async fn resolve_ref(&self, dir: &Path, reference: &str) -> Result<String, TransportError>;

    async fn clone_repository(&self, request: CloneRequest) -> Result<(), TransportError>;

    /// Commits reachable from `HEAD` along first parents, newest first, at
    /// most `depth` of them.
    async fn log(&self, dir: &Path, depth: usize) -> Result<Vec<CommitObject>, TransportError>;

    async fn read_commit(&self, dir: &Path, oid: &str) -> Result<CommitObject, TransportError>;

    async fn read_tree(&self, dir: &Path, tree_id: &str) -> Result<Vec<TreeEntry>, TransportError>;

    async fn read_blob(&self, dir: &Path, oid: &str) -> Result<Vec<u8>, TransportError>;
}
