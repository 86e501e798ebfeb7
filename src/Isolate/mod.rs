mod config;
pub mod lifecycle;
mod manager;
mod record;

pub use config::{IsolateManagerConfig, PostInitHandshake};
pub use lifecycle::{notify_destroyed, notify_initialized, LifecycleCommand, LIFECYCLE_MESSAGE_TYPE};
pub use manager::{AppModel, IsolateManager, IsolateProxy};
pub use record::{IsolateRecord, IsolateState, IsolateTable};
