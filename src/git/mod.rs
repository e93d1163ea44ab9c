mod store;

pub use store::GitObjectStore;
