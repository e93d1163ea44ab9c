use std::{path::PathBuf, sync::Arc};

use crate::{
    api::{Interesting, RepoCache},
    config::{default_cache_directory, CacheConfig, InvalidConfig},
    fetch::CloneOrchestrator,
    git::GitObjectStore,
    history::has_extension,
    metadata::{MetadataStore, TomlMetadataStore},
    store::{ObjectStore, ProgressSink},
};

/// Extension of the files a scan flags unless told otherwise.
pub const DEFAULT_INTERESTING_EXTENSION: &str = "kicad_sch";

#[derive(Default)]
pub struct RepoCacheBuilder {
    cache_directory: Option<PathBuf>,
    config: Option<CacheConfig>,
    object_store: Option<Arc<dyn ObjectStore>>,
    metadata_store: Option<Arc<dyn MetadataStore>>,
    interesting: Option<Interesting>,
    progress: Option<ProgressSink>,
}

impl RepoCacheBuilder {
    /// Location of the cache directory.
    ///
    /// Defaults to `$HOME/.repocache`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(path.into());
        self
    }

    /// Defaults to [`CacheConfig::default`].
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Where repositories are cloned and read from.
    ///
    /// Defaults to [`GitObjectStore`].
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Defaults to a [`TomlMetadataStore`] inside the cache directory.
    pub fn metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata_store = Some(store);
        self
    }

    /// Predicate used by [`RepoCache::list_commits`].
    ///
    /// Defaults to files with the `kicad_sch` extension.
    pub fn interesting(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.interesting = Some(Arc::new(predicate));
        self
    }

    /// Receives the transfer progress of every clone the cache starts.
    pub fn progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn try_build(self) -> Result<RepoCache, InvalidConfig> {
        let Self {
            cache_directory,
            config,
            object_store,
            metadata_store,
            interesting,
            progress,
        } = self;
        let cache_directory = match cache_directory.or_else(default_cache_directory) {
            Some(directory) => directory,
            None => {
                return Err(InvalidConfig::new(
                    "could not find the home directory, set a cache directory explicitly",
                ))
            }
        };

        let object_store: Arc<dyn ObjectStore> = match object_store {
            Some(store) => store,
            None => Arc::new(GitObjectStore::new()),
        };
        let metadata_store: Arc<dyn MetadataStore> = match metadata_store {
            Some(store) => store,
            None => Arc::new(TomlMetadataStore::in_directory(&cache_directory)),
        };
        let interesting: Interesting = match interesting {
            Some(predicate) => predicate,
            None => Arc::new(has_extension([DEFAULT_INTERESTING_EXTENSION])),
        };

        let mut orchestrator = CloneOrchestrator::new(
            cache_directory,
            object_store,
            metadata_store,
            config.unwrap_or_default(),
        )?;
        if let Some(progress) = progress {
            orchestrator = orchestrator.with_progress(progress);
        }
        Ok(RepoCache {
            orchestrator,
            interesting,
        })
    }
}
