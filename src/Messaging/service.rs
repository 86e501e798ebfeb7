use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{HostError, Result};
use crate::Core::transport::Transport;

use super::dispatcher::MessageDispatcher;
use super::message::{Message, SenderHandle, SenderResolver, NO_RESPONSE_ID};
use super::outgoing::OutgoingMessage;

/// Per-endpoint messaging facade: builds, decodes and sends messages and owns
/// the endpoint's dispatcher. Built with [`super::MessagingServiceBuilder`].
pub struct MessagingService {
    pub(crate) own_sender: SenderHandle,
    pub(crate) resolver: Arc<dyn SenderResolver>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dispatcher: MessageDispatcher,
    pub(crate) next_id: AtomicI32,
    pub(crate) initial_capacity: usize,
}

impl MessagingService {
    fn next_message_id(&self) -> i32 {
        // ids stay non-negative so they can double as response ids
        loop {
            let current = self.next_id.load(Ordering::Relaxed);
            let next = if current == i32::MAX { 0 } else { current + 1 };
            if self
                .next_id
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return current;
            }
        }
    }

    pub fn own_sender(&self) -> SenderHandle {
        self.own_sender
    }

    /// A fresh request or notification from this endpoint.
    pub fn new_outgoing_message(
        &self,
        message_type: &str,
        return_type: Option<&str>,
    ) -> Result<OutgoingMessage> {
        OutgoingMessage::new(
            self.next_message_id(),
            self.own_sender,
            message_type,
            return_type,
            NO_RESPONSE_ID,
            &*self.resolver,
            self.initial_capacity,
        )
    }

    /// A reply to `request`: its type is the request's return type and its
    /// response id is the request's id.
    ///
    /// # Returns
    /// * `Err(HostError::IllegalState)` if the request names no return type
    pub fn new_reply(&self, request: &Message) -> Result<OutgoingMessage> {
        let reply_type = request.return_type().ok_or_else(|| {
            HostError::illegal_state(format!(
                "message {} of type {:?} has no return type to reply with",
                request.id(),
                request.message_type()
            ))
        })?;
        OutgoingMessage::new(
            self.next_message_id(),
            self.own_sender,
            reply_type,
            None,
            request.id(),
            &*self.resolver,
            self.initial_capacity,
        )
    }

    /// Decode raw inbound bytes into a message.
    pub fn new_message(&self, frame: Vec<u8>) -> Result<Message> {
        Message::decode(frame, self.transport.data_offset(), &*self.resolver)
    }

    pub fn message_dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    /// Hand a finished message to the transport.
    pub fn send(&self, message: &OutgoingMessage) -> Result<()> {
        message.verify_header()?;
        self.transport.send(message.serialize())?;
        tracing::trace!(
            id = message.id(),
            message_type = message.message_type(),
            len = message.len(),
            "sent message"
        );
        Ok(())
    }

    /// Send `message` and wait for the reply carrying its id.
    ///
    /// The reply type is reserved for the duration of the call, so it must not
    /// be registered elsewhere. Replies to other requests are discarded.
    pub fn request(&self, message: &OutgoingMessage, timeout: Duration) -> Result<Message> {
        let reply_type = message.return_type().ok_or_else(|| {
            HostError::illegal_state(format!(
                "request {} has no return type to wait for",
                message.id()
            ))
        })?;
        let registration = self.dispatcher.register_direct(reply_type)?;
        let outcome = self.await_reply(message, reply_type, timeout);
        self.dispatcher.cancel_registration(&registration)?;
        outcome
    }

    fn await_reply(
        &self,
        message: &OutgoingMessage,
        reply_type: &str,
        timeout: Duration,
    ) -> Result<Message> {
        self.send(message)?;
        let deadline = Instant::now().checked_add(timeout);
        loop {
            // an unrepresentable deadline keeps the full timeout, which the dispatcher waits out untimed
            let left = deadline.map_or(timeout, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            let reply = self.dispatcher.wait_for_message(reply_type, left)?;
            if reply.response_id() == message.id() {
                return Ok(reply);
            }
            tracing::debug!(
                expected = message.id(),
                got = reply.response_id(),
                "discarding reply to another request"
            );
        }
    }

    /// Close the transport and stop this endpoint's dispatcher.
    ///
    /// The transport goes first so a reader parked in an unbounded receive
    /// sees `BrokenPipe` before the dispatcher joins it.
    pub fn shutdown(&self) {
        self.transport.close();
        self.dispatcher.shutdown();
    }
}

impl Drop for MessagingService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
