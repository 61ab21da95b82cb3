//! Directory Client
//!
//! Read-only access to the external directory service, plus a local cache of
//! the parent/child relation the reconciler has observed.
//!
//! ## Variants
//!
//! - [`HttpDirectoryClient`] - the directory service REST API (reqwest)
//! - [`MemoryDirectory`] - an in-process tree, used by tests

pub mod cache;
pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::types::{DirectoryId, DirectoryNode, Result};

pub use cache::DirectoryCache;
pub use http::HttpDirectoryClient;
pub use memory::MemoryDirectory;

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch one node; `NotFound` if it no longer exists
    async fn get_node(&self, id: DirectoryId) -> Result<DirectoryNode>;

    /// Ancestors of `id`, nearest parent first and the root last.
    /// Empty for the root itself; `NotFound` if `id` no longer exists.
    async fn get_ancestor_chain(&self, id: DirectoryId) -> Result<Vec<DirectoryNode>>;
}
