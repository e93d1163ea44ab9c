use std::{
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::{Duration, Instant},
};

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use log::{debug, info, trace, warn};

use crate::{
    config::{CacheConfig, InvalidConfig},
    error::{CacheError, StoreError},
    flock::FileLock,
    metadata::MetadataStore,
    model::{CacheEntryMetadata, RepoIdentity},
    store::{CloneRequest, ObjectStore, ProgressSink},
};

const STORE_LOCK_WAIT: Duration = Duration::from_secs(30);
/// Clones of one identity attempted by a single `ensure` when a finished
/// clone vanishes before it is read (store switched or destroyed meanwhile).
const CLONE_ATTEMPTS: usize = 2;

type PendingClone = Shared<BoxFuture<'static, Result<(), CacheError>>>;

/// A local clone that is ready to be read.
#[derive(Clone)]
pub struct Checkout {
    pub objects: Arc<dyn ObjectStore>,
    pub dir: PathBuf,
}

struct StoreHandle {
    name: String,
    root: PathBuf,
    _lock: FileLock,
}

impl StoreHandle {
    fn open(cache_dir: &Path, name: &str) -> Result<Self, CacheError> {
        let root = cache_dir.join(name);
        if root.exists() && !root.is_dir() {
            return Err(StoreError::Other(format!(
                "object store location {} is not a directory",
                root.display()
            ))
            .into());
        }
        std::fs::create_dir_all(&root)?;
        // The lock sits next to the store so that no identity can collide with it.
        let lock = FileLock::acquire(&cache_dir.join(format!("{name}.lock")), STORE_LOCK_WAIT)
            .map_err(StoreError::from)?;
        debug!("Opened object store at {}", root.display());
        Ok(StoreHandle {
            name: name.to_owned(),
            root,
            _lock: lock,
        })
    }
}

/// Makes sure a repository is cloned locally before anything reads it.
///
/// At most one clone per identity is in flight at any time; callers that
/// arrive while it runs wait for it and share its outcome.
pub struct CloneOrchestrator {
    cache_dir: PathBuf,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    config: RwLock<CacheConfig>,
    store: Mutex<Option<StoreHandle>>,
    /// Serialises opening the store so that two callers never contend for
    /// its lock file.
    opening: tokio::sync::Mutex<()>,
    /// In-flight clones keyed by working directory, which includes the store.
    pending: Arc<DashMap<PathBuf, PendingClone>>,
    progress: Option<ProgressSink>,
}

impl CloneOrchestrator {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: CacheConfig,
    ) -> Result<Self, InvalidConfig> {
        config.validate()?;
        Ok(CloneOrchestrator {
            cache_dir: cache_dir.into(),
            objects,
            metadata,
            config: RwLock::new(config),
            store: Mutex::new(None),
            opening: tokio::sync::Mutex::new(()),
            pending: Arc::new(DashMap::new()),
            progress: None,
        })
    }

    /// Progress sink for clones started without one of their own.
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn config(&self) -> CacheConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the runtime configuration. A new store name takes effect on
    /// the next access to the object store.
    pub fn set_config(&self, config: CacheConfig) -> Result<(), InvalidConfig> {
        config.validate()?;
        debug!("Updated cache configuration: {:?}", config);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    /// Where the working directory of `identity` lives, without opening the
    /// object store.
    pub fn working_dir_path(&self, identity: &RepoIdentity) -> PathBuf {
        self.cache_dir
            .join(self.config().store_name)
            .join(identity.to_path())
    }

    /// Root of the object store, opening it on first use or after the store
    /// name changed.
    pub async fn store_root(&self) -> Result<PathBuf, CacheError> {
        let store_name = self.config().store_name;
        if let Some(root) = self.open_root(&store_name)? {
            return Ok(root);
        }

        let _opening = self.opening.lock().await;
        if let Some(root) = self.open_root(&store_name)? {
            return Ok(root);
        }
        // Waiting for the lock file may block, keep it off the runtime workers.
        let cache_dir = self.cache_dir.clone();
        let name = store_name.clone();
        let handle = tokio::task::spawn_blocking(move || StoreHandle::open(&cache_dir, &name))
            .await
            .map_err(|error| {
                StoreError::Other(format!("opening the object store failed: {error}"))
            })??;

        let root = handle.root.clone();
        let mut store = self.lock_store()?;
        if let Some(previous) = store.as_ref() {
            info!(
                "Object store changed from {} to {}, reopened",
                previous.name, store_name
            );
        }
        *store = Some(handle);
        Ok(root)
    }

    fn open_root(&self, store_name: &str) -> Result<Option<PathBuf>, CacheError> {
        Ok(self
            .lock_store()?
            .as_ref()
            .filter(|handle| handle.name == store_name)
            .map(|handle| handle.root.clone()))
    }

    /// Deletes the whole object store. It is recreated empty on next use.
    pub(crate) fn destroy_store(&self) -> Result<(), CacheError> {
        let mut store = self.lock_store()?;
        let handle = store.take();
        let root = match &handle {
            Some(handle) => handle.root.clone(),
            None => self.cache_dir.join(self.config().store_name),
        };
        info!("Deleting object store {}", root.display());
        let result = match std::fs::remove_dir_all(&root) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        };
        drop(handle);
        result
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, Option<StoreHandle>>, CacheError> {
        self.store
            .lock()
            .map_err(|_| StoreError::Other("object store handle poisoned".to_owned()).into())
    }

    /// Returns a usable clone of `identity`, cloning it first on a miss.
    ///
    /// A hit bumps the repository's `last_accessed`; a fresh clone records a
    /// new metadata row. Metadata failures never fail the call.
    pub async fn ensure(
        &self,
        identity: &RepoIdentity,
        progress: Option<ProgressSink>,
    ) -> Result<Checkout, CacheError> {
        let mut dir = self.store_root().await?.join(identity.to_path());
        if let Ok(head) = self.objects.resolve_ref(&dir, "HEAD").await {
            debug!("Cache hit for {} at {}", identity, head);
            self.touch(identity);
            return Ok(self.checkout(dir));
        }
        debug!("Cache miss for {}", identity);

        let progress = progress.or_else(|| self.progress.clone());
        for _ in 0..CLONE_ATTEMPTS {
            let clone = match self.pending.entry(dir.clone()) {
                Entry::Occupied(entry) => {
                    debug!("Waiting for the clone of {} already in progress", identity);
                    entry.get().clone()
                }
                Entry::Vacant(entry) => {
                    let clone = self.start_clone(identity, dir.clone(), progress.clone());
                    entry.insert(clone.clone());
                    clone
                }
            };
            clone.await?;
            if self.objects.resolve_ref(&dir, "HEAD").await.is_ok() {
                return Ok(self.checkout(dir));
            }
            warn!(
                "Clone of {} disappeared from {} before it was read",
                identity,
                dir.display()
            );
            dir = self.store_root().await?.join(identity.to_path());
        }
        Err(CacheError::CloneFailed(format!(
            "{identity} was removed from the cache while it was being cloned"
        )))
    }

    fn checkout(&self, dir: PathBuf) -> Checkout {
        Checkout {
            objects: self.objects.clone(),
            dir,
        }
    }

    fn start_clone(
        &self,
        identity: &RepoIdentity,
        dir: PathBuf,
        progress: Option<ProgressSink>,
    ) -> PendingClone {
        let config = self.config();
        let request = CloneRequest {
            dir,
            url: identity.to_git_url(&config.remote_base_url),
            depth: config.clone_depth(),
            single_branch: true,
            no_tags: true,
            proxy: config.relay_proxy_url.clone(),
            on_progress: progress,
        };
        let objects = self.objects.clone();
        let metadata = self.metadata.clone();
        let identity = identity.clone();
        let guard = PendingGuard {
            pending: self.pending.clone(),
            dir: request.dir.clone(),
        };

        async move {
            let _guard = guard;
            // Another clone may have completed between our miss and registration.
            if objects.resolve_ref(&request.dir, "HEAD").await.is_ok() {
                debug!("{} was cloned while waiting", identity);
                return Ok(());
            }
            clone_repository(
                objects.as_ref(),
                metadata.as_ref(),
                &identity,
                request,
                config.clone_timeout,
            )
            .await
        }
        .boxed()
        .shared()
    }

    fn touch(&self, identity: &RepoIdentity) {
        let now = Utc::now();
        let entry = match self.metadata.get(identity) {
            Ok(Some(mut entry)) => {
                entry.last_accessed = now;
                entry
            }
            Ok(None) => {
                debug!("No metadata for cached {}, recreating it", identity);
                CacheEntryMetadata::new(identity.clone(), now)
            }
            Err(error) => {
                warn!("Could not read metadata of {}: {}", identity, error);
                return;
            }
        };
        if let Err(error) = self.metadata.put(entry) {
            warn!("Could not update metadata of {}: {}", identity, error);
        }
    }
}

/// Unregisters an in-flight clone when it finishes, fails or is dropped.
struct PendingGuard {
    pending: Arc<DashMap<PathBuf, PendingClone>>,
    dir: PathBuf,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.dir);
    }
}

async fn clone_repository(
    objects: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    identity: &RepoIdentity,
    request: CloneRequest,
    timeout: Duration,
) -> Result<(), CacheError> {
    let dir = request.dir.clone();
    // Leftovers of an interrupted clone.
    if let Err(error) = remove_working_dir(&dir) {
        warn!("Could not remove stale {}: {}", dir.display(), error);
    }

    info!("Cloning {} from {}", identity, request.url);
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, objects.clone_repository(request)).await {
        Ok(result) => result.map_err(CacheError::from),
        Err(_) => Err(CacheError::Timeout {
            identity: identity.to_string(),
            timeout,
        }),
    };

    match result {
        Ok(()) => {
            info!("Cloned {} in {:.1?}", identity, start.elapsed());
            if let Err(error) = metadata.put(CacheEntryMetadata::new(identity.clone(), Utc::now()))
            {
                warn!(
                    "Cloned {} but could not record it in the metadata store: {}",
                    identity, error
                );
            }
            Ok(())
        }
        Err(error) => {
            warn!("Cloning {} failed: {}", identity, error);
            if let Err(cleanup) = remove_working_dir(&dir) {
                warn!("Could not clean up {}: {}", dir.display(), cleanup);
            }
            Err(error)
        }
    }
}

/// Removes a working directory and, if that leaves it empty, its owner
/// directory. A directory that is already gone is not an error.
pub(crate) fn remove_working_dir(dir: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => trace!("Removed {}", dir.display()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    if let Some(owner) = dir.parent() {
        // Fails harmlessly while other repositories of the owner remain.
        let _ = std::fs::remove_dir(owner);
    }
    Ok(())
}
