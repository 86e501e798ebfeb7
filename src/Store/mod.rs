mod arbiter;
mod handle;

pub use arbiter::{StoreAccessToken, StoreArbiter, StoreHolders};
pub use handle::{Node, StorageBackend, StoreHandle};
