use std::sync::Arc;

use log::debug;

use crate::{
    api::DEFAULT_INTERESTING_EXTENSION,
    history::has_extension,
    store::{CloneProgress, ProgressSink},
};

pub mod args;
pub mod command_handlers;

/// Predicate for `--ext` flags, falling back to the default extension.
pub fn extension_predicate(extensions: &[String]) -> impl Fn(&str) -> bool + Send + Sync + 'static {
    let extensions = if extensions.is_empty() {
        vec![DEFAULT_INTERESTING_EXTENSION.to_owned()]
    } else {
        extensions.to_vec()
    };
    has_extension(extensions)
}

/// Logs clone progress at debug level.
pub fn log_progress() -> ProgressSink {
    Arc::new(|progress: CloneProgress| match progress.total {
        Some(total) => debug!("{}: {}/{}", progress.phase, progress.loaded, total),
        None => debug!("{}: {}", progress.phase, progress.loaded),
    })
}
