use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::MessageDispatcher;
use super::message::{ProcessIdResolver, SenderHandle, SenderResolver};
use super::service::MessagingService;
use crate::error::Result;
use crate::Core::codec::INITIAL_CAPACITY;
use crate::Core::transport::Transport;

pub struct MessagingServiceBuilder {
    own_sender: SenderHandle,
    resolver: Arc<dyn SenderResolver>,
    initial_capacity: usize,
    poll_interval: Duration,
    thread_name: String,
}

impl Default for MessagingServiceBuilder {
    fn default() -> Self {
        Self {
            own_sender: SenderHandle::Process(std::process::id()),
            resolver: Arc::new(ProcessIdResolver),
            initial_capacity: INITIAL_CAPACITY,
            poll_interval: Duration::from_millis(50), // reader wakes this often to check for shutdown
            thread_name: "dispatch-reader".to_owned(),
        }
    }
}

impl MessagingServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_own_sender(mut self, sender: SenderHandle) -> Self {
        self.own_sender = sender;
        self
    }

    pub fn with_sender_resolver(mut self, resolver: Arc<dyn SenderResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Start the endpoint: spawns the dispatcher's reader over `transport`.
    /// Decoding starts at the transport's `data_offset`.
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<MessagingService> {
        let dispatcher = MessageDispatcher::start(
            transport.clone(),
            self.resolver.clone(),
            self.poll_interval,
            &self.thread_name,
        )?;
        Ok(MessagingService {
            own_sender: self.own_sender,
            resolver: self.resolver,
            transport,
            dispatcher,
            next_id: AtomicI32::new(0),
            initial_capacity: self.initial_capacity,
        })
    }
}
