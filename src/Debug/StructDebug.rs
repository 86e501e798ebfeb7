use std::fmt;

use crate::Isolate::{IsolateManager, IsolateProxy, IsolateRecord, IsolateTable};
use crate::Messaging::dispatcher::Slot;
use crate::Messaging::{Message, MessageDispatcher, MessagingService, OutgoingMessage};
use crate::Store::{StoreArbiter, StoreHandle};

/// Debug function for Message
///
/// Shows header fields and payload size, never the payload bytes
pub fn debug_message(message: &Message, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Message")
        .field("id", &message.id())
        .field("response_id", &message.response_id())
        .field("sender", &message.sender())
        .field("type", &message.message_type())
        .field("return_type", &message.return_type())
        .field("payload_len", &message.payload().len())
        .field("remaining", &message.remaining())
        .finish()
}

pub fn debug_outgoing_message(
    message: &OutgoingMessage,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    f.debug_struct("OutgoingMessage")
        .field("id", &message.id())
        .field("response_id", &message.response_id())
        .field("type", &message.message_type())
        .field("return_type", &message.return_type())
        .field("header_offset", &message.header_offset())
        .field("len", &message.len())
        .field("capacity", &message.capacity())
        .finish()
}

/// Debug function for MessageDispatcher
///
/// Lists registrations by type with their mode, plus handler worker status
pub fn debug_dispatcher(dispatcher: &MessageDispatcher, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let registrations: Vec<(String, String)> = {
        let registry = dispatcher.shared.registry.lock();
        let mut entries: Vec<_> = registry
            .iter()
            .map(|(message_type, slot)| {
                let mode = match slot {
                    Slot::Direct(direct) => format!(
                        "direct(queued={}, waiters={})",
                        direct.queue.len(),
                        direct.waiters
                    ),
                    Slot::Handler(_) => "handler".to_owned(),
                };
                (message_type.clone(), mode)
            })
            .collect();
        entries.sort();
        entries
    };
    let (running, handlers, queued) = {
        let worker = dispatcher.shared.worker.lock();
        (worker.running, worker.handlers, worker.queue.len())
    };
    f.debug_struct("MessageDispatcher")
        .field("data_offset", &dispatcher.data_offset())
        .field("registrations", &registrations)
        .field("worker_running", &running)
        .field("handlers", &handlers)
        .field("handler_queue", &queued)
        .finish()
}

pub fn debug_messaging_service(
    service: &MessagingService,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    f.debug_struct("MessagingService")
        .field("own_sender", &service.own_sender)
        .field("transport", &"<opaque>")
        .field("initial_capacity", &service.initial_capacity)
        .field("dispatcher", &service.dispatcher)
        .finish()
}

/// Debug function for StoreArbiter
///
/// Shows current holder counts; the backend stays opaque
pub fn debug_store_arbiter(arbiter: &StoreArbiter, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoreArbiter")
        .field("holders", &arbiter.holders())
        .field("backend", &"<opaque>")
        .finish()
}

pub fn debug_store_handle(handle: &StoreHandle, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StoreHandle")
        .field("token", &handle.token())
        .field("backend", &"<opaque>")
        .finish()
}

pub fn debug_isolate_record(record: &IsolateRecord, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IsolateRecord")
        .field("pid", &record.pid())
        .field("state", &record.state())
        .finish()
}

/// Debug function for IsolateTable
///
/// Renders pid -> state, sorted by pid
pub fn debug_isolate_table(table: &IsolateTable, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let records: Vec<_> = table.records.lock().values().cloned().collect();
    let mut states: Vec<_> = records
        .iter()
        .map(|record| (record.pid(), record.state()))
        .collect();
    states.sort();
    f.debug_map().entries(states).finish()
}

pub fn debug_isolate_proxy(proxy: &IsolateProxy, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IsolateProxy")
        .field("pid", &proxy.pid())
        .field("state", &proxy.state())
        .finish()
}

pub fn debug_isolate_manager(manager: &IsolateManager, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IsolateManager")
        .field("default_vm_args", &manager.config.default_vm_args)
        .field("runtime_properties", &manager.config.runtime_properties)
        .field("init_timeout", &manager.config.init_timeout)
        .field("isolates", &*manager.table)
        .finish_non_exhaustive()
}

// Debug proxy implementations that call the standalone debug functions

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_message(self, f)
    }
}

impl fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_outgoing_message(self, f)
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_dispatcher(self, f)
    }
}

impl fmt::Debug for MessagingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_messaging_service(self, f)
    }
}

impl fmt::Debug for StoreArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_store_arbiter(self, f)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_store_handle(self, f)
    }
}

impl fmt::Debug for IsolateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_isolate_record(self, f)
    }
}

impl fmt::Debug for IsolateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_isolate_table(self, f)
    }
}

impl fmt::Debug for IsolateProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_isolate_proxy(self, f)
    }
}

impl fmt::Debug for IsolateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_isolate_manager(self, f)
    }
}
