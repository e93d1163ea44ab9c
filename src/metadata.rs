use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::trace;
use serde::{Deserialize, Serialize};

use crate::{
    error::StoreError,
    model::{CacheEntryMetadata, RepoIdentity},
};

pub const METADATA_FILE_NAME: &str = "metadata.toml";

/// Freshness and recency bookkeeping, one row per cached repository.
///
/// Rows are stored apart from the clones themselves so they can be pruned or
/// rebuilt without touching git data. Each call is its own transaction.
pub trait MetadataStore: Send + Sync {
    fn get(&self, identity: &RepoIdentity) -> Result<Option<CacheEntryMetadata>, StoreError>;

    /// Inserts the row or replaces the existing one for the same identity.
    fn put(&self, entry: CacheEntryMetadata) -> Result<(), StoreError>;

    /// All rows, most recently accessed first.
    fn list_all(&self) -> Result<Vec<CacheEntryMetadata>, StoreError>;

    /// Removing an identity that has no row is not an error.
    fn delete(&self, identity: &RepoIdentity) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

const VERSION: i64 = 1;

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct MetadataFile {
    #[serde(default)]
    repositories: Vec<CacheEntryMetadata>,
}

#[derive(Debug, Serialize)]
struct VersionedMetadataFile<'a> {
    version: i64,
    #[serde(flatten)]
    content: &'a MetadataFile,
}

impl MetadataFile {
    fn from_str(s: &str) -> Result<MetadataFile, StoreError> {
        let mut table = toml::from_str::<toml::Table>(s).map_err(other)?;
        match table.remove("version") {
            Some(toml::Value::Integer(VERSION)) | None => {
                table.try_into::<MetadataFile>().map_err(other)
            }
            Some(unsupported) => Err(StoreError::Other(format!(
                "unsupported metadata file version {unsupported}"
            ))),
        }
    }

    fn to_string(&self) -> Result<String, StoreError> {
        toml::to_string_pretty(&VersionedMetadataFile {
            version: VERSION,
            content: self,
        })
        .map_err(other)
    }
}

fn other(error: impl std::fmt::Display) -> StoreError {
    StoreError::Other(error.to_string())
}

/// [`MetadataStore`] kept in a single TOML document.
pub struct TomlMetadataStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl TomlMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TomlMetadataStore {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn in_directory(directory: &Path) -> Self {
        Self::new(directory.join(METADATA_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<MetadataFile, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => MetadataFile::from_str(&contents),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(MetadataFile::default()),
            Err(error) => Err(error.into()),
        }
    }

    fn write(&self, file: &MetadataFile) -> Result<(), StoreError> {
        let contents = file.to_string()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temporary = self.path.with_extension("toml.tmp");
        {
            let mut out = std::fs::File::create(&temporary)?;
            out.write_all(contents.as_bytes())?;
            out.sync_all()?;
        }
        std::fs::rename(&temporary, &self.path)?;
        trace!(
            "Wrote {} metadata rows to {}",
            file.repositories.len(),
            self.path.display()
        );
        Ok(())
    }

    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut MetadataFile) -> Option<T>,
    ) -> Result<Option<T>, StoreError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| StoreError::Other("metadata lock poisoned".to_owned()))?;
        let mut file = self.read()?;
        let before = file.clone();
        let result = f(&mut file);
        if file != before {
            self.write(&file)?;
        }
        Ok(result)
    }
}

impl MetadataStore for TomlMetadataStore {
    fn get(&self, identity: &RepoIdentity) -> Result<Option<CacheEntryMetadata>, StoreError> {
        self.transaction(|file| {
            file.repositories
                .iter()
                .find(|entry| &entry.identity == identity)
                .cloned()
        })
    }

    fn put(&self, entry: CacheEntryMetadata) -> Result<(), StoreError> {
        self.transaction(|file| {
            match file
                .repositories
                .iter_mut()
                .find(|existing| existing.identity == entry.identity)
            {
                Some(existing) => *existing = entry,
                None => file.repositories.push(entry),
            }
            Some(())
        })?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<CacheEntryMetadata>, StoreError> {
        let mut entries = self
            .transaction(|file| Some(file.repositories.clone()))?
            .unwrap_or_default();
        sort_most_recent_first(&mut entries);
        Ok(entries)
    }

    fn delete(&self, identity: &RepoIdentity) -> Result<(), StoreError> {
        self.transaction(|file| {
            file.repositories.retain(|entry| &entry.identity != identity);
            Some(())
        })?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| StoreError::Other("metadata lock poisoned".to_owned()))?;
        match std::fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}

pub(crate) fn sort_most_recent_first(entries: &mut [CacheEntryMetadata]) {
    entries.sort_by(|a, b| {
        b.last_accessed
            .cmp(&a.last_accessed)
            .then_with(|| a.identity.cmp(&b.identity))
    });
}
