use std::sync::Arc;

use super::arbiter::{ArbiterShared, StoreAccessToken};
use crate::error::{HostError, Result};

/// A node of the content store tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    /// Container node listing the URIs of its children.
    Container { uri: String, children: Vec<String> },
    /// Leaf node holding data.
    Data { uri: String, data: Vec<u8> },
}

impl Node {
    pub fn uri(&self) -> &str {
        match self {
            Node::Container { uri, .. } | Node::Data { uri, .. } => uri,
        }
    }
}

/// Tree-structured persistent storage, addressed by URI.
///
/// Implementations must tolerate concurrent calls; the arbiter only ever lets
/// several callers in at once for `get_node`.
pub trait StorageBackend: Send + Sync {
    fn create_data_node(&self, uri: &str, data: &[u8]) -> Result<()>;
    fn create_node(&self, uri: &str) -> Result<()>;
    fn get_node(&self, uri: &str) -> Result<Option<Node>>;
    fn delete_node(&self, uri: &str) -> Result<()>;
    fn update_data_node(&self, uri: &str, data: &[u8]) -> Result<()>;
}

/// Capability-gated view of the store, granted by [`super::StoreArbiter`].
///
/// Mutations need an exclusive token; reads are always allowed. The held slot
/// is released when the handle is closed or dropped.
pub struct StoreHandle {
    pub(crate) token: StoreAccessToken,
    pub(crate) arbiter: Arc<ArbiterShared>,
    pub(crate) backend: Arc<dyn StorageBackend>,
}

impl StoreHandle {
    pub fn token(&self) -> StoreAccessToken {
        self.token
    }

    pub fn is_exclusive(&self) -> bool {
        self.token.exclusive
    }

    fn require_exclusive(&self, operation: &'static str) -> Result<()> {
        if self.token.exclusive {
            Ok(())
        } else {
            Err(HostError::AccessDenied { operation })
        }
    }

    pub fn create_data_node(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.require_exclusive("create_data_node")?;
        self.backend.create_data_node(uri, data)
    }

    pub fn create_node(&self, uri: &str) -> Result<()> {
        self.require_exclusive("create_node")?;
        self.backend.create_node(uri)
    }

    pub fn get_node(&self, uri: &str) -> Result<Option<Node>> {
        self.backend.get_node(uri)
    }

    pub fn delete_node(&self, uri: &str) -> Result<()> {
        self.require_exclusive("delete_node")?;
        self.backend.delete_node(uri)
    }

    pub fn update_data_node(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.require_exclusive("update_data_node")?;
        self.backend.update_data_node(uri, data)
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.arbiter.release(self.token);
    }
}

