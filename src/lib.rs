pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod git;
pub mod history;
pub mod lifecycle;
pub mod metadata;
pub mod model;
pub mod store;

mod api;
mod flock;
#[cfg(test)]
mod testing;

pub use api::{Interesting, RepoCache, RepoCacheBuilder, DEFAULT_INTERESTING_EXTENSION};
pub use error::{CacheError, StoreError};
pub use model::RepoIdentity;
