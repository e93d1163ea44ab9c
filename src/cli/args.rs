use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Local cache of remote git repositories: commit history and file contents
/// at any cached commit.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Location of the cache directory.
    /// Defaults to $HOME/.repocache
    #[clap(long, global = true)]
    pub cache_directory: Option<PathBuf>,
    /// Configuration file.
    /// Defaults to $HOME/.repocache/config.toml if it exists
    #[clap(long, global = true, env = "REPOCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lists the newest commits, marking those that changed interesting files
    Commits {
        /// Repository as owner/name
        repository: String,
        /// Number of commits to list, defaults to the configured history depth
        #[clap(short, long)]
        depth: Option<usize>,
        /// Extension of interesting files, may be repeated [default: kicad_sch]
        #[clap(long = "ext")]
        extensions: Vec<String>,
    },
    /// Lists or extracts the interesting files of a commit
    Files {
        repository: String,
        commit: String,
        #[clap(long = "ext")]
        extensions: Vec<String>,
        /// Write the files below this directory instead of listing them
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Lists the interesting files a commit changed
    Changed {
        repository: String,
        commit: String,
        #[clap(long = "ext")]
        extensions: Vec<String>,
    },
    /// Lists cached repositories, most recently used first
    List,
    /// Removes one repository from the cache
    Invalidate { repository: String },
    /// Removes every cached repository
    Clear,
    /// Shows how much space the cache uses
    Quota,
    /// Removes repositories that have not been used recently
    Prune {
        #[clap(long)]
        older_than_days: u32,
    },
}

impl Command {
    /// Extensions selected on the command line, empty when not applicable.
    pub fn extensions(&self) -> &[String] {
        match self {
            Command::Commits { extensions, .. }
            | Command::Files { extensions, .. }
            | Command::Changed { extensions, .. } => extensions,
            _ => &[],
        }
    }
}
