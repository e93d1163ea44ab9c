use std::process::ExitCode;

use clap::Parser;

use repocache::{
    cli::{
        args::{CliArgs, Command},
        command_handlers::{
            do_changed, do_clear, do_commits, do_files, do_invalidate, do_list, do_prune, do_quota,
        },
        extension_predicate, log_progress,
    },
    config::RepocacheConfig,
    RepoCache,
};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli_args = CliArgs::parse();
    let config = RepocacheConfig::load(cli_args.config.as_deref())?;

    let mut builder = RepoCache::builder().config(config.cache);
    if let Some(cache_directory) = cli_args.cache_directory.or(config.cache_dir) {
        builder = builder.cache_directory(cache_directory);
    }
    let cache = builder
        .interesting(extension_predicate(cli_args.cmd.extensions()))
        .progress(log_progress())
        .try_build()?;

    match &cli_args.cmd {
        Command::Commits {
            repository, depth, ..
        } => do_commits(&cache, repository, *depth).await,
        Command::Files {
            repository,
            commit,
            extensions,
            output,
        } => do_files(&cache, repository, commit, extensions, output.as_deref()).await,
        Command::Changed {
            repository,
            commit,
            extensions,
        } => do_changed(&cache, repository, commit, extensions).await,
        Command::List => do_list(&cache),
        Command::Invalidate { repository } => do_invalidate(&cache, repository),
        Command::Clear => do_clear(&cache),
        Command::Quota => do_quota(&cache),
        Command::Prune { older_than_days } => do_prune(&cache, *older_than_days),
    }
}
