use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::manager::IsolateProxy;
use crate::error::Result;
use crate::Messaging::MessagingService;

/// One-time exchange run after an isolate reports it is initialized and
/// before `new_isolate` hands it to the caller.
pub trait PostInitHandshake: Send + Sync {
    fn handshake(&self, isolate: &IsolateProxy, messaging: &MessagingService) -> Result<()>;
}

impl<F> PostInitHandshake for F
where
    F: Fn(&IsolateProxy, &MessagingService) -> Result<()> + Send + Sync,
{
    fn handshake(&self, isolate: &IsolateProxy, messaging: &MessagingService) -> Result<()> {
        self(isolate, messaging)
    }
}

pub struct IsolateManagerConfig {
    pub(crate) default_vm_args: Vec<String>,
    pub(crate) runtime_properties: Option<PathBuf>,
    pub(crate) init_timeout: Duration,
    pub(crate) handshake: Option<Arc<dyn PostInitHandshake>>,
}

impl Default for IsolateManagerConfig {
    fn default() -> Self {
        Self {
            default_vm_args: Vec::new(),
            runtime_properties: None,
            init_timeout: Duration::from_secs(30),
            handshake: None,
        }
    }
}

impl IsolateManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments placed first on every isolate's command line.
    pub fn with_default_vm_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_vm_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Properties file passed to every isolate as `--runtime-properties=<path>`.
    pub fn with_runtime_properties(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_properties = Some(path.into());
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_handshake<H: PostInitHandshake + 'static>(mut self, handshake: H) -> Self {
        self.handshake = Some(Arc::new(handshake));
        self
    }

    pub fn init_timeout(&self) -> Duration {
        self.init_timeout
    }
}
