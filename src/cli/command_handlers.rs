use std::path::{Component, Path};

use anyhow::{bail, Context};
use chrono::Duration;
use log::info;

use crate::{cli::extension_predicate, RepoCache};

/// Handler to commits command
pub async fn do_commits(
    cache: &RepoCache,
    repository: &str,
    depth: Option<usize>,
) -> anyhow::Result<()> {
    let depth = depth.unwrap_or_else(|| cache.config().max_commit_depth);
    for record in cache.list_commits(repository, depth).await? {
        println!(
            "{} {} {} {}",
            &record.hash[..record.hash.len().min(10)],
            record.authored_at.format("%Y-%m-%d %H:%M"),
            if record.changed_interesting_files { '*' } else { ' ' },
            record.first_message_line
        );
    }
    Ok(())
}

/// Handler to files command
/// Prints the interesting files of a commit, or writes them below `output`
pub async fn do_files(
    cache: &RepoCache,
    repository: &str,
    commit: &str,
    extensions: &[String],
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let files = cache
        .get_interesting_files(repository, commit, extension_predicate(extensions))
        .await?;

    let Some(output) = output else {
        for file in &files {
            println!("{}\t{}", file.content.len(), file.path);
        }
        return Ok(());
    };
    for file in &files {
        let relative = Path::new(&file.path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            bail!("Refusing to write {} outside of {}", file.path, output.display());
        }
        let target = output.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        std::fs::write(&target, &file.content)
            .with_context(|| format!("Could not write {}", target.display()))?;
    }
    info!("Wrote {} files to {}", files.len(), output.display());
    Ok(())
}

/// Handler to changed command
pub async fn do_changed(
    cache: &RepoCache,
    repository: &str,
    commit: &str,
    extensions: &[String],
) -> anyhow::Result<()> {
    for path in cache
        .get_changed_interesting_files(repository, commit, extension_predicate(extensions))
        .await?
    {
        println!("{path}");
    }
    Ok(())
}

/// Handler to list command
pub fn do_list(cache: &RepoCache) -> anyhow::Result<()> {
    for entry in cache.list_cached()? {
        println!(
            "{}\tcloned {}\tlast used {}",
            entry.identity,
            entry.cloned_at.format("%Y-%m-%d %H:%M"),
            entry.last_accessed.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub fn do_invalidate(cache: &RepoCache, repository: &str) -> anyhow::Result<()> {
    cache.invalidate(repository)?;
    Ok(())
}

pub fn do_clear(cache: &RepoCache) -> anyhow::Result<()> {
    info!("Clearing repository cache {}", cache.cache_directory().display());
    cache.clear_all();
    Ok(())
}

pub fn do_quota(cache: &RepoCache) -> anyhow::Result<()> {
    match cache.storage_quota() {
        Some(quota) => println!(
            "{} used of {} ({:.2}%)",
            human_bytes(quota.usage_bytes),
            human_bytes(quota.quota_bytes),
            quota.usage_percent
        ),
        None => println!("Storage usage is unavailable"),
    }
    Ok(())
}

pub fn do_prune(cache: &RepoCache, older_than_days: u32) -> anyhow::Result<()> {
    for identity in cache.prune(Duration::days(older_than_days.into()))? {
        println!("{identity}");
    }
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
