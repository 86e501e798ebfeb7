// Routes inbound messages by type to a blocked waiter or an async handler.

use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{HostError, Result};
use crate::Core::transport::Transport;

use super::message::{Message, SenderResolver};

/// Longest pause after a failed receive before the reader retries.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Callback invoked once per inbound message of a subscribed type.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message);
}

impl<F> MessageHandler for F
where
    F: Fn(Message) + Send + Sync + 'static,
{
    fn handle(&self, message: Message) {
        self(message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationKind {
    /// Reserved for synchronous retrieval via `wait_for_message`.
    Direct,
    /// Served by a handler on the shared worker thread.
    Handler,
}

/// Token for one registration of a message type. Valid until cancelled.
#[derive(Debug)]
pub struct Registration {
    pub(crate) id: u64,
    pub(crate) message_type: String,
    pub(crate) kind: RegistrationKind,
}

impl Registration {
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn kind(&self) -> RegistrationKind {
        self.kind
    }
}

pub(crate) struct DirectSlot {
    pub(crate) id: u64,
    pub(crate) queue: VecDeque<Message>,
    pub(crate) waiters: usize,
    unblock_epoch: u64,
}

pub(crate) struct HandlerEntry {
    pub(crate) id: u64,
    pub(crate) message_type: String,
    handler: Box<dyn MessageHandler>,
    active: AtomicBool,
    // held for the duration of one delivery; reentrant so a handler may cancel itself
    delivery: ReentrantMutex<()>,
}

pub(crate) enum Slot {
    Direct(DirectSlot),
    Handler(Arc<HandlerEntry>),
}

impl Slot {
    fn id(&self) -> u64 {
        match self {
            Slot::Direct(slot) => slot.id,
            Slot::Handler(entry) => entry.id,
        }
    }
}

#[derive(Default)]
pub(crate) struct WorkerState {
    pub(crate) queue: VecDeque<(Arc<HandlerEntry>, Message)>,
    pub(crate) handlers: usize,
    pub(crate) running: bool,
    shutdown: bool,
}

pub(crate) struct DispatcherShared {
    pub(crate) registry: Mutex<HashMap<String, Slot>>,
    direct_ready: Condvar,
    pub(crate) worker: Mutex<WorkerState>,
    worker_ready: Condvar,
    next_registration: AtomicU64,
    shutdown: AtomicBool,
    data_offset: usize,
    resolver: Arc<dyn SenderResolver>,
}

/// Per-endpoint message router.
///
/// Each message type has at most one registration at a time: either a direct
/// reservation served by [`MessageDispatcher::wait_for_message`], or a handler
/// run on a shared worker thread that starts with the first handler and stops
/// when the last one is cancelled. Messages of types with no registration are
/// dropped.
pub struct MessageDispatcher {
    pub(crate) shared: Arc<DispatcherShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl MessageDispatcher {
    /// A dispatcher fed only through [`MessageDispatcher::dispatch`] and
    /// [`MessageDispatcher::dispatch_bytes`].
    pub fn detached(resolver: Arc<dyn SenderResolver>, data_offset: usize) -> Self {
        Self {
            shared: Arc::new(DispatcherShared {
                registry: Mutex::new(HashMap::new()),
                direct_ready: Condvar::new(),
                worker: Mutex::new(WorkerState::default()),
                worker_ready: Condvar::new(),
                next_registration: AtomicU64::new(1),
                shutdown: AtomicBool::new(false),
                data_offset,
                resolver,
            }),
            reader: Mutex::new(None),
        }
    }

    /// A dispatcher with a background thread draining `transport`.
    pub fn start(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn SenderResolver>,
        poll_interval: Duration,
        thread_name: &str,
    ) -> io::Result<Self> {
        let dispatcher = Self::detached(resolver, transport.data_offset());
        let shared = dispatcher.shared.clone();
        let handle = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || shared.reader_loop(transport, poll_interval))?;
        *dispatcher.reader.lock() = Some(handle);
        Ok(dispatcher)
    }

    pub fn data_offset(&self) -> usize {
        self.shared.data_offset
    }

    /// Reserve `message_type` for synchronous retrieval.
    ///
    /// # Returns
    /// * `Err(HostError::TypeConflict)` if the type has any registration
    pub fn register_direct(&self, message_type: &str) -> Result<Registration> {
        let mut registry = self.shared.registry.lock();
        if registry.contains_key(message_type) {
            return Err(HostError::TypeConflict {
                message_type: message_type.to_owned(),
            });
        }
        let id = self.shared.next_registration.fetch_add(1, Ordering::Relaxed);
        registry.insert(
            message_type.to_owned(),
            Slot::Direct(DirectSlot {
                id,
                queue: VecDeque::new(),
                waiters: 0,
                unblock_epoch: 0,
            }),
        );
        tracing::trace!(message_type, id, "registered direct");
        Ok(Registration {
            id,
            message_type: message_type.to_owned(),
            kind: RegistrationKind::Direct,
        })
    }

    /// Install `handler` for every inbound message of `message_type`,
    /// delivered in arrival order.
    ///
    /// # Returns
    /// * `Err(HostError::TypeConflict)` if the type already has a registration
    pub fn register_handler<H: MessageHandler>(
        &self,
        message_type: &str,
        handler: H,
    ) -> Result<Registration> {
        let mut registry = self.shared.registry.lock();
        if registry.contains_key(message_type) {
            return Err(HostError::TypeConflict {
                message_type: message_type.to_owned(),
            });
        }
        self.shared.acquire_worker()?;
        let id = self.shared.next_registration.fetch_add(1, Ordering::Relaxed);
        registry.insert(
            message_type.to_owned(),
            Slot::Handler(Arc::new(HandlerEntry {
                id,
                message_type: message_type.to_owned(),
                handler: Box::new(handler),
                active: AtomicBool::new(true),
                delivery: ReentrantMutex::new(()),
            })),
        );
        tracing::trace!(message_type, id, "registered handler");
        Ok(Registration {
            id,
            message_type: message_type.to_owned(),
            kind: RegistrationKind::Handler,
        })
    }

    /// Block until a message of a directly reserved type arrives.
    ///
    /// # Returns
    /// * `Ok(message)` when one arrives
    /// * `Err(HostError::TypeConflict)` if the type is not reserved via `register_direct`
    /// * `Err(HostError::TimedOut)` when `timeout` elapses
    /// * `Err(HostError::Unblocked)` when the wait is unblocked, or the reservation cancelled
    pub fn wait_for_message(&self, message_type: &str, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now().checked_add(timeout);
        let mut registry = self.shared.registry.lock();
        let (id, epoch) = match registry.get_mut(message_type) {
            Some(Slot::Direct(slot)) => {
                slot.waiters += 1;
                (slot.id, slot.unblock_epoch)
            }
            _ => {
                return Err(HostError::TypeConflict {
                    message_type: message_type.to_owned(),
                })
            }
        };

        let unblocked = || HostError::Unblocked {
            message_type: message_type.to_owned(),
        };
        let mut timed_out = false;
        let result = loop {
            match registry.get_mut(message_type) {
                Some(Slot::Direct(slot)) if slot.id == id => {
                    if slot.unblock_epoch != epoch {
                        break Err(unblocked());
                    }
                    if let Some(message) = slot.queue.pop_front() {
                        break Ok(message);
                    }
                }
                _ => break Err(unblocked()),
            }
            if self.shared.shutdown.load(Ordering::Acquire) {
                break Err(unblocked());
            }
            if timed_out {
                break Err(HostError::timed_out(format!(
                    "message of type {:?}",
                    message_type
                )));
            }
            match deadline {
                Some(deadline) => {
                    timed_out = self
                        .shared
                        .direct_ready
                        .wait_until(&mut registry, deadline)
                        .timed_out();
                }
                None => self.shared.direct_ready.wait(&mut registry),
            }
        };

        if let Some(Slot::Direct(slot)) = registry.get_mut(message_type) {
            if slot.id == id {
                slot.waiters -= 1;
            }
        }
        result
    }

    /// Wake every thread currently blocked in `wait_for_message` for
    /// `message_type`; they fail with `Unblocked`.
    ///
    /// # Returns
    /// * `true` if at least one waiter was woken
    pub fn unblock(&self, message_type: &str) -> bool {
        let mut registry = self.shared.registry.lock();
        match registry.get_mut(message_type) {
            Some(Slot::Direct(slot)) if slot.waiters > 0 => {
                slot.unblock_epoch += 1;
                self.shared.direct_ready.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Stop delivery to `registration`.
    ///
    /// A delivery already running on the handler worker completes first;
    /// nothing is delivered once this returns. Queued direct messages that
    /// were never retrieved are dropped.
    ///
    /// # Returns
    /// * `Err(HostError::IllegalState)` if the registration was already cancelled
    pub fn cancel_registration(&self, registration: &Registration) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        let current = matches!(
            registry.get(&registration.message_type),
            Some(slot) if slot.id() == registration.id
        );
        if !current {
            return Err(HostError::illegal_state(format!(
                "registration {} for type {:?} is already cancelled",
                registration.id, registration.message_type
            )));
        }
        let removed = registry.remove(&registration.message_type);
        drop(registry);

        match removed {
            Some(Slot::Direct(slot)) => {
                if !slot.queue.is_empty() {
                    tracing::debug!(
                        message_type = %registration.message_type,
                        dropped = slot.queue.len(),
                        "cancelled direct registration with unread messages"
                    );
                }
                // wake waiters so they observe the cancellation
                let _registry = self.shared.registry.lock();
                self.shared.direct_ready.notify_all();
            }
            Some(Slot::Handler(entry)) => {
                entry.active.store(false, Ordering::Release);
                // wait out an in-flight delivery
                drop(entry.delivery.lock());
                self.shared.release_worker(entry.id);
            }
            None => {}
        }
        tracing::trace!(message_type = %registration.message_type, id = registration.id, "cancelled registration");
        Ok(())
    }

    /// Route an already decoded message as if it came from the transport.
    pub fn dispatch(&self, message: Message) {
        self.shared.route(message);
    }

    /// Decode and route a raw frame.
    ///
    /// # Returns
    /// * `Err(HostError::Protocol)` if the frame does not decode; nothing is routed
    pub fn dispatch_bytes(&self, frame: Vec<u8>) -> Result<()> {
        let message = Message::decode(frame, self.shared.data_offset, &*self.shared.resolver)?;
        self.shared.route(message);
        Ok(())
    }

    /// Types that currently hold a registration.
    pub fn registered_types(&self) -> Vec<String> {
        self.shared.registry.lock().keys().cloned().collect()
    }

    /// Whether the shared handler worker thread is alive.
    pub fn handler_worker_running(&self) -> bool {
        self.shared.worker.lock().running
    }

    /// Stop the reader thread and the handler worker and unblock all waiters.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut worker = self.shared.worker.lock();
            worker.shutdown = true;
            self.shared.worker_ready.notify_all();
        }
        {
            let _registry = self.shared.registry.lock();
            self.shared.direct_ready.notify_all();
        }
        if let Some(handle) = self.reader.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        tracing::debug!("dispatcher shut down");
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl DispatcherShared {
    fn reader_loop(self: Arc<Self>, transport: Arc<dyn Transport>, poll_interval: Duration) {
        tracing::debug!("dispatcher reader started");
        while !self.shutdown.load(Ordering::Acquire) {
            match transport.receive_timeout(poll_interval) {
                Ok(Some(frame)) => {
                    match Message::decode(frame, self.data_offset, &*self.resolver) {
                        Ok(message) => self.route(message),
                        Err(e) => tracing::warn!(error = %e, "dropping malformed message"),
                    }
                }
                Ok(None) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::info!("transport closed; dispatcher reader exiting");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport receive failed");
                    thread::sleep(poll_interval.min(MAX_RETRY_BACKOFF));
                }
            }
        }
        tracing::debug!("dispatcher reader stopped");
    }

    fn route(self: &Arc<Self>, message: Message) {
        let mut registry = self.registry.lock();
        match registry.get_mut(message.message_type()) {
            Some(Slot::Direct(slot)) => {
                slot.queue.push_back(message);
                self.direct_ready.notify_all();
            }
            Some(Slot::Handler(entry)) => {
                let entry = entry.clone();
                // enqueue under the registry lock so concurrent routers keep arrival order
                let mut worker = self.worker.lock();
                worker.queue.push_back((entry, message));
                self.worker_ready.notify_one();
            }
            None => {
                tracing::debug!(
                    message_type = message.message_type(),
                    id = message.id(),
                    "dropping message with no registration"
                );
            }
        }
    }

    /// Count one more handler, starting the worker thread if it is idle.
    fn acquire_worker(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.shutdown {
            return Err(HostError::illegal_state("dispatcher is shut down"));
        }
        worker.handlers += 1;
        if !worker.running {
            let shared = self.clone();
            let spawned = thread::Builder::new()
                .name("dispatch-handlers".to_owned())
                .spawn(move || shared.worker_loop());
            if let Err(e) = spawned {
                worker.handlers -= 1;
                return Err(e.into());
            }
            worker.running = true;
            tracing::debug!("handler worker started");
        }
        Ok(())
    }

    fn release_worker(&self, entry_id: u64) {
        let mut worker = self.worker.lock();
        worker.handlers = worker.handlers.saturating_sub(1);
        worker.queue.retain(|(entry, _)| entry.id != entry_id);
        self.worker_ready.notify_all();
    }

    fn worker_loop(self: Arc<Self>) {
        let mut worker = self.worker.lock();
        loop {
            if worker.shutdown {
                worker.queue.clear();
                break;
            }
            if let Some((entry, message)) = worker.queue.pop_front() {
                MutexGuard::unlocked(&mut worker, || deliver(&entry, message));
                continue;
            }
            if worker.handlers == 0 {
                break;
            }
            self.worker_ready.wait(&mut worker);
        }
        worker.running = false;
        tracing::debug!("handler worker stopped");
    }
}

fn deliver(entry: &HandlerEntry, message: Message) {
    let _delivery = entry.delivery.lock();
    if !entry.active.load(Ordering::Acquire) {
        return;
    }
    let outcome = catch_unwind(AssertUnwindSafe(|| entry.handler.handle(message)));
    if outcome.is_err() {
        tracing::error!(
            message_type = %entry.message_type,
            "message handler panicked; message dropped"
        );
    }
}
