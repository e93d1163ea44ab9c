//! Differences between two tree snapshots of the same clone.
//!
//! Subtrees whose ids match on both sides are skipped without being read,
//! which is what keeps scanning a long history cheap: most commits only touch
//! a handful of directories.

use std::{collections::BTreeMap, path::Path};

use crate::{
    error::CacheError,
    model::{Change, ChangeKind, ChangeSet},
    store::{EntryKind, ObjectStore, TreeEntry},
};

enum Work {
    Compare {
        old: String,
        new: String,
        prefix: String,
    },
    /// Every blob below `tree` is reported with the same kind.
    Enumerate {
        tree: String,
        prefix: String,
        kind: ChangeKind,
    },
}

/// Lists every blob path that differs between `old_tree` and `new_tree`.
pub async fn diff_trees(
    objects: &dyn ObjectStore,
    dir: &Path,
    old_tree: &str,
    new_tree: &str,
) -> Result<ChangeSet, CacheError> {
    diff_trees_under(objects, dir, old_tree, new_tree, "").await
}

/// Like [`diff_trees`], with every reported path prefixed by `prefix`.
pub async fn diff_trees_under(
    objects: &dyn ObjectStore,
    dir: &Path,
    old_tree: &str,
    new_tree: &str,
    prefix: &str,
) -> Result<ChangeSet, CacheError> {
    let mut changes = ChangeSet::new();
    if old_tree == new_tree {
        return Ok(changes);
    }

    let mut work = vec![Work::Compare {
        old: old_tree.to_owned(),
        new: new_tree.to_owned(),
        prefix: prefix.to_owned(),
    }];
    while let Some(item) = work.pop() {
        match item {
            Work::Compare { old, new, prefix } => {
                let old_entries = read_tree(objects, dir, &old).await?;
                let new_entries = read_tree(objects, dir, &new).await?;
                let old_index = by_name(&old_entries);
                let new_index = by_name(&new_entries);

                for (name, old_entry) in &old_index {
                    let path = join(&prefix, name);
                    match new_index.get(name) {
                        None => removed_or_added(
                            old_entry,
                            path,
                            ChangeKind::Deleted,
                            &mut changes,
                            &mut work,
                        ),
                        Some(new_entry) if new_entry.oid == old_entry.oid => {}
                        Some(new_entry) => match (old_entry.kind, new_entry.kind) {
                            (EntryKind::Tree, EntryKind::Tree) => work.push(Work::Compare {
                                old: old_entry.oid.clone(),
                                new: new_entry.oid.clone(),
                                prefix: path,
                            }),
                            // Content changes, and a blob replaced by a tree or back.
                            _ => changes.push(Change::new(path, ChangeKind::Modified)),
                        },
                    }
                }
                for (name, new_entry) in &new_index {
                    if !old_index.contains_key(name) {
                        removed_or_added(
                            new_entry,
                            join(&prefix, name),
                            ChangeKind::Added,
                            &mut changes,
                            &mut work,
                        );
                    }
                }
            }
            Work::Enumerate { tree, prefix, kind } => {
                for entry in read_tree(objects, dir, &tree).await? {
                    let path = join(&prefix, &entry.path);
                    removed_or_added(&entry, path, kind, &mut changes, &mut work);
                }
            }
        }
    }
    Ok(changes)
}

fn removed_or_added(
    entry: &TreeEntry,
    path: String,
    kind: ChangeKind,
    changes: &mut ChangeSet,
    work: &mut Vec<Work>,
) {
    match entry.kind {
        EntryKind::Blob => changes.push(Change::new(path, kind)),
        EntryKind::Tree => work.push(Work::Enumerate {
            tree: entry.oid.clone(),
            prefix: path,
            kind,
        }),
    }
}

/// A blob found while walking a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPath {
    pub path: String,
    pub oid: String,
}

/// Walks `tree` and returns the blobs whose full path satisfies
/// `is_interesting`, stopping after `limit` matches if one is given.
pub async fn find_blobs<F>(
    objects: &dyn ObjectStore,
    dir: &Path,
    tree: &str,
    is_interesting: &F,
    limit: Option<usize>,
) -> Result<Vec<BlobPath>, CacheError>
where
    F: Fn(&str) -> bool + Sync + ?Sized,
{
    let mut found = Vec::new();
    let mut work = vec![(tree.to_owned(), String::new())];
    while let Some((tree, prefix)) = work.pop() {
        for entry in read_tree(objects, dir, &tree).await? {
            let path = join(&prefix, &entry.path);
            match entry.kind {
                EntryKind::Tree => work.push((entry.oid, path)),
                EntryKind::Blob if is_interesting(path.as_str()) => {
                    found.push(BlobPath {
                        path,
                        oid: entry.oid,
                    });
                    if limit.is_some_and(|limit| found.len() >= limit) {
                        return Ok(found);
                    }
                }
                EntryKind::Blob => {}
            }
        }
    }
    Ok(found)
}

/// Whether any blob below `tree` satisfies `is_interesting`.
pub async fn contains_blob<F>(
    objects: &dyn ObjectStore,
    dir: &Path,
    tree: &str,
    is_interesting: &F,
) -> Result<bool, CacheError>
where
    F: Fn(&str) -> bool + Sync + ?Sized,
{
    Ok(!find_blobs(objects, dir, tree, is_interesting, Some(1))
        .await?
        .is_empty())
}

async fn read_tree(
    objects: &dyn ObjectStore,
    dir: &Path,
    tree: &str,
) -> Result<Vec<TreeEntry>, CacheError> {
    objects
        .read_tree(dir, tree)
        .await
        .map_err(CacheError::local_read)
}

fn by_name(entries: &[TreeEntry]) -> BTreeMap<&str, &TreeEntry> {
    entries
        .iter()
        .map(|entry| (entry.path.as_str(), entry))
        .collect()
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}
