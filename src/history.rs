use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::{
    diff::{contains_blob, diff_trees, find_blobs},
    error::CacheError,
    fetch::{Checkout, CloneOrchestrator},
    model::{history::first_line, CommitRecord, InterestingFile, RepoIdentity},
    store::{CommitObject, ObjectStore, TransportError},
};

/// The newest `max_depth` commits of the default branch, newest first.
///
/// A commit is flagged when it changed at least one interesting path relative
/// to the next older commit in the window. The oldest commit of the window
/// has nothing to compare against and is flagged when its tree holds an
/// interesting file at all.
pub async fn list_commits<F>(
    orchestrator: &CloneOrchestrator,
    identity: &RepoIdentity,
    max_depth: usize,
    is_interesting: &F,
) -> Result<Vec<CommitRecord>, CacheError>
where
    F: Fn(&str) -> bool + Sync + ?Sized,
{
    let Checkout { objects, dir } = orchestrator.ensure(identity, None).await?;
    let commits = objects
        .log(&dir, max_depth)
        .await
        .map_err(CacheError::local_read)?;
    debug!("Scanning {} commits of {}", commits.len(), identity);

    let mut records = Vec::with_capacity(commits.len());
    for (index, commit) in commits.iter().enumerate() {
        let changed_interesting_files = match commits.get(index + 1) {
            Some(parent) => diff_trees(objects.as_ref(), &dir, &parent.tree_id, &commit.tree_id)
                .await?
                .iter()
                .any(|change| is_interesting(change.path.as_str())),
            None => contains_blob(objects.as_ref(), &dir, &commit.tree_id, is_interesting).await?,
        };
        records.push(CommitRecord {
            hash: commit.oid.clone(),
            authored_at: authored_at(commit),
            first_message_line: first_line(&commit.message),
            changed_interesting_files,
        });
    }
    Ok(records)
}

/// Every interesting file in the tree of `commit_hash`, sorted by path.
pub async fn get_interesting_files<F>(
    orchestrator: &CloneOrchestrator,
    identity: &RepoIdentity,
    commit_hash: &str,
    is_interesting: &F,
) -> Result<Vec<InterestingFile>, CacheError>
where
    F: Fn(&str) -> bool + Sync + ?Sized,
{
    let Checkout { objects, dir } = orchestrator.ensure(identity, None).await?;
    let commit = read_commit(objects.as_ref(), &dir, identity, commit_hash).await?;

    let mut blobs =
        find_blobs(objects.as_ref(), &dir, &commit.tree_id, is_interesting, None).await?;
    blobs.sort_by(|a, b| a.path.cmp(&b.path));

    let mut files = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let content = objects
            .read_blob(&dir, &blob.oid)
            .await
            .map_err(CacheError::local_read)?;
        files.push(InterestingFile {
            path: blob.path,
            content,
        });
    }
    info!(
        "Read {} interesting files of {} at {}",
        files.len(),
        identity,
        commit_hash
    );
    Ok(files)
}

/// Interesting paths that `commit_hash` touched relative to its first parent,
/// sorted and without duplicates.
///
/// When the parent is not available locally (a root commit, or the edge of a
/// shallow clone) every interesting path of the commit's tree is reported.
pub async fn get_changed_interesting_files<F>(
    orchestrator: &CloneOrchestrator,
    identity: &RepoIdentity,
    commit_hash: &str,
    is_interesting: &F,
) -> Result<Vec<String>, CacheError>
where
    F: Fn(&str) -> bool + Sync + ?Sized,
{
    let Checkout { objects, dir } = orchestrator.ensure(identity, None).await?;
    let commit = read_commit(objects.as_ref(), &dir, identity, commit_hash).await?;

    let parent = match commit.parents.first() {
        Some(parent) => match objects.read_commit(&dir, parent).await {
            Ok(parent) => Some(parent),
            Err(TransportError::NotFound(_)) => {
                debug!("Parent {} of {} is not in the clone", parent, commit.oid);
                None
            }
            Err(error) => return Err(CacheError::local_read(error)),
        },
        None => None,
    };

    let mut paths: Vec<String> = match parent {
        Some(parent) => diff_trees(objects.as_ref(), &dir, &parent.tree_id, &commit.tree_id)
            .await?
            .into_iter()
            .map(|change| change.path)
            .filter(|path| is_interesting(path.as_str()))
            .collect(),
        None => find_blobs(objects.as_ref(), &dir, &commit.tree_id, is_interesting, None)
            .await?
            .into_iter()
            .map(|blob| blob.path)
            .collect(),
    };
    paths.sort();
    paths.dedup();
    Ok(paths)
}

async fn read_commit(
    objects: &dyn ObjectStore,
    dir: &Path,
    identity: &RepoIdentity,
    commit_hash: &str,
) -> Result<CommitObject, CacheError> {
    objects
        .read_commit(dir, commit_hash)
        .await
        .map_err(|error| match error {
            TransportError::NotFound(_) => CacheError::CommitNotFound {
                identity: identity.to_string(),
                commit: commit_hash.to_owned(),
            },
            other => CacheError::local_read(other),
        })
}

fn authored_at(commit: &CommitObject) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(commit.author_timestamp_seconds, 0).unwrap_or_else(|| {
        warn!(
            "Commit {} has an out of range author time {}, using the epoch",
            commit.oid, commit.author_timestamp_seconds
        );
        DateTime::<Utc>::default()
    })
}

/// Matches paths whose file extension is one of `extensions`, ignoring case
/// and any leading dot.
pub fn has_extension<I, S>(extensions: I) -> impl Fn(&str) -> bool + Send + Sync + 'static
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let extensions: Vec<String> = extensions
        .into_iter()
        .map(|extension| extension.as_ref().trim_start_matches('.').to_ascii_lowercase())
        .collect();
    move |path: &str| {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        match file_name.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() => extensions
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(extension)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use crate::{
        config::CacheConfig,
        testing::{MemoryMetadataStore, MemoryObjectStore},
    };

    fn is_schematic(path: &str) -> bool {
        path.ends_with(".kicad_sch")
    }

    fn orchestrator(objects: Arc<MemoryObjectStore>) -> (tempfile::TempDir, CloneOrchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = CloneOrchestrator::new(
            dir.path(),
            objects,
            MemoryMetadataStore::new(),
            CacheConfig::default(),
        )
        .unwrap();
        (dir, orchestrator)
    }

    fn identity() -> RepoIdentity {
        RepoIdentity::parse("acme/board").unwrap()
    }

    /// Three commits: add a schematic, touch only the readme, edit the
    /// schematic. Returns the hashes oldest first.
    fn three_commits(objects: &MemoryObjectStore) -> [String; 3] {
        [
            objects.commit(
                &[("readme.md", "v1"), ("hw/top.kicad_sch", "v1")],
                "Add schematic",
                1_700_000_000,
            ),
            objects.commit(
                &[("readme.md", "v2"), ("hw/top.kicad_sch", "v1")],
                "Update readme",
                1_700_000_100,
            ),
            objects.commit(
                &[("readme.md", "v2"), ("hw/top.kicad_sch", "v2")],
                "Rework power section\n\nMoved the regulator.",
                1_700_000_200,
            ),
        ]
    }

    #[tokio::test]
    async fn commits_are_flagged_against_the_next_older_commit() {
        let objects = MemoryObjectStore::new();
        let [first, second, third] = three_commits(&objects);
        let (_dir, orchestrator) = orchestrator(objects.clone());

        let records = list_commits(&orchestrator, &identity(), 3, &is_schematic)
            .await
            .unwrap();

        let hashes: Vec<&str> = records.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(hashes, vec![third.as_str(), second.as_str(), first.as_str()]);
        let flags: Vec<bool> = records.iter().map(|r| r.changed_interesting_files).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(records[0].first_message_line, "Rework power section");
        assert_eq!(records[0].authored_at.timestamp(), 1_700_000_200);
    }

    #[tokio::test]
    async fn window_edge_is_flagged_by_its_tree() {
        let objects = MemoryObjectStore::new();
        let [_, second, third] = three_commits(&objects);
        let (_dir, orchestrator) = orchestrator(objects.clone());

        let records = list_commits(&orchestrator, &identity(), 2, &is_schematic)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].hash, third);
        assert_eq!(records[1].hash, second);
        // `second` only touched the readme, but its tree holds a schematic.
        assert!(records[1].changed_interesting_files);

        let none = list_commits(&orchestrator, &identity(), 2, &|_: &str| false)
            .await
            .unwrap();
        assert!(none.iter().all(|r| !r.changed_interesting_files));
    }

    #[tokio::test]
    async fn single_commit_is_flagged_by_its_tree() {
        let objects = MemoryObjectStore::new();
        objects.commit(&[("top.kicad_sch", "v1")], "Initial", 1);
        let (_dir, orchestrator) = orchestrator(objects.clone());

        let records = list_commits(&orchestrator, &identity(), 10, &is_schematic)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert!(records[0].changed_interesting_files);
        // Only the commit's own tree was walked.
        assert_eq!(objects.read_tree_calls(), 1);
    }

    #[tokio::test]
    async fn interesting_files_at_a_commit() {
        let objects = MemoryObjectStore::new();
        let [first, _, third] = three_commits(&objects);
        objects.commit(
            &[
                ("readme.md", "v2"),
                ("hw/top.kicad_sch", "v2"),
                ("a.kicad_sch", "new"),
            ],
            "Add sheet",
            1_700_000_300,
        );
        let (_dir, orchestrator) = orchestrator(objects.clone());

        let files = get_interesting_files(&orchestrator, &identity(), &third, &is_schematic)
            .await
            .unwrap();
        assert_eq!(
            files,
            vec![InterestingFile {
                path: "hw/top.kicad_sch".to_owned(),
                content: b"v2".to_vec(),
            }]
        );

        let files = get_interesting_files(&orchestrator, &identity(), &first, &|_: &str| true)
            .await
            .unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["hw/top.kicad_sch", "readme.md"]);
    }

    async fn changed(orchestrator: &CloneOrchestrator, hash: &str) -> Vec<String> {
        get_changed_interesting_files(orchestrator, &identity(), hash, &is_schematic)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn changed_files_against_the_parent() {
        let objects = MemoryObjectStore::new();
        let [first, second, third] = three_commits(&objects);
        let (_dir, orchestrator) = orchestrator(objects.clone());

        assert_eq!(changed(&orchestrator, &third).await, vec!["hw/top.kicad_sch"]);
        assert_eq!(changed(&orchestrator, &second).await, Vec::<String>::new());
        // A root commit reports every interesting file it contains.
        assert_eq!(changed(&orchestrator, &first).await, vec!["hw/top.kicad_sch"]);
    }

    #[tokio::test]
    async fn history_of_a_growing_schematic() {
        let objects = MemoryObjectStore::new();
        objects.commit(&[("x.txt", "x")], "Initial commit", 1);
        objects.commit(
            &[("x.txt", "x"), ("y.kicad_sch", "v1")],
            "Add schematic",
            2,
        );
        objects.commit(
            &[("x.txt", "x"), ("y.kicad_sch", "v2")],
            "Edit schematic",
            3,
        );
        let (_dir, orchestrator) = orchestrator(objects.clone());

        let records = list_commits(&orchestrator, &identity(), 10, &is_schematic)
            .await
            .unwrap();

        let messages: Vec<&str> = records
            .iter()
            .map(|r| r.first_message_line.as_str())
            .collect();
        assert_eq!(
            messages,
            vec!["Edit schematic", "Add schematic", "Initial commit"]
        );
        let flags: Vec<bool> = records.iter().map(|r| r.changed_interesting_files).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[tokio::test]
    async fn unknown_commit_is_reported_as_such() {
        let objects = MemoryObjectStore::new();
        three_commits(&objects);
        let (_dir, orchestrator) = orchestrator(objects.clone());

        let error = get_interesting_files(&orchestrator, &identity(), "deadbeef", &is_schematic)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            CacheError::CommitNotFound {
                identity: "acme/board".to_owned(),
                commit: "deadbeef".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn scanning_reuses_the_clone() {
        let objects = MemoryObjectStore::new();
        let [_, _, third] = three_commits(&objects);
        let (_dir, orchestrator) = orchestrator(objects.clone());

        list_commits(&orchestrator, &identity(), 3, &is_schematic)
            .await
            .unwrap();
        get_changed_interesting_files(&orchestrator, &identity(), &third, &is_schematic)
            .await
            .unwrap();

        assert_eq!(objects.clone_calls(), 1);
    }

    #[test]
    fn author_time_out_of_range_falls_back_to_the_epoch() {
        let mut commit = CommitObject {
            oid: "c1".to_owned(),
            author_timestamp_seconds: 1_700_000_000,
            message: "Initial".to_owned(),
            tree_id: "t1".to_owned(),
            parents: Vec::new(),
        };
        assert_eq!(authored_at(&commit).timestamp(), 1_700_000_000);

        commit.author_timestamp_seconds = i64::MAX;
        assert_eq!(authored_at(&commit).timestamp(), 0);
    }

    #[test]
    fn extension_predicate() {
        let predicate = has_extension([".kicad_sch", "KICAD_PCB"]);
        assert!(predicate("top.kicad_sch"));
        assert!(predicate("hw/power/PSU.KICAD_SCH"));
        assert!(predicate("board.kicad_pcb"));
        assert!(!predicate("readme.md"));
        assert!(!predicate("hw.kicad_sch/readme"));
        assert!(!predicate(".kicad_sch"));
        assert!(!predicate("kicad_sch"));
    }
}
