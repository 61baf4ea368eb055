//! Persistence for the credential roster. The in-memory pool is a cache
//! over this store; reloads flow one way, store to pool.

pub mod entities;
pub mod store;

pub use store::{CredentialStorage, StorageError};
