// Lifecycle notifications sent by isolates to the executive.
//
// Payload: UTF command name, then the isolate pid as i32.

use crate::error::{HostError, Result};
use crate::Messaging::{Message, MessagingService, OutgoingMessage};

/// Message type reserved for lifecycle notifications.
pub const LIFECYCLE_MESSAGE_TYPE: &str = "isolate.lifecycle";

const INITIALIZED: &str = "initialized";
const DESTROYED: &str = "destroyed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleCommand {
    Initialized { pid: u32 },
    Destroyed { pid: u32 },
}

impl LifecycleCommand {
    pub fn pid(&self) -> u32 {
        match *self {
            LifecycleCommand::Initialized { pid } | LifecycleCommand::Destroyed { pid } => pid,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            LifecycleCommand::Initialized { .. } => INITIALIZED,
            LifecycleCommand::Destroyed { .. } => DESTROYED,
        }
    }

    /// Build the notification message on `service`.
    pub fn to_message(&self, service: &MessagingService) -> Result<OutgoingMessage> {
        let pid = i32::try_from(self.pid())
            .map_err(|_| HostError::protocol(format!("pid {} does not fit the wire", self.pid())))?;
        let mut message = service.new_outgoing_message(LIFECYCLE_MESSAGE_TYPE, None)?;
        message.write_utf(Some(self.name()))?.write_i32(pid);
        Ok(message)
    }

    /// Parse a lifecycle notification from its payload.
    pub fn from_message(message: &mut Message) -> Result<Self> {
        if message.message_type() != LIFECYCLE_MESSAGE_TYPE {
            return Err(HostError::protocol(format!(
                "{:?} is not a lifecycle message",
                message.message_type()
            )));
        }
        message.reset();
        let command = message.read_utf()?;
        let pid = message.read_i32()?;
        let pid = u32::try_from(pid)
            .map_err(|_| HostError::protocol(format!("negative pid {} in lifecycle message", pid)))?;
        match command.as_deref() {
            Some(INITIALIZED) => Ok(LifecycleCommand::Initialized { pid }),
            Some(DESTROYED) => Ok(LifecycleCommand::Destroyed { pid }),
            other => Err(HostError::protocol(format!(
                "unknown lifecycle command {:?}",
                other
            ))),
        }
    }
}

/// Tell the executive this isolate finished initializing. Called from inside
/// the isolate with its own pid.
pub fn notify_initialized(service: &MessagingService, pid: u32) -> Result<()> {
    service.send(&LifecycleCommand::Initialized { pid }.to_message(service)?)
}

/// Tell the executive this isolate is going away.
pub fn notify_destroyed(service: &MessagingService, pid: u32) -> Result<()> {
    service.send(&LifecycleCommand::Destroyed { pid }.to_message(service)?)
}
