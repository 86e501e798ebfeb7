mod builder;
pub mod dispatcher;
pub mod message;
pub mod outgoing;
mod service;

pub use builder::MessagingServiceBuilder;
pub use dispatcher::{MessageDispatcher, MessageHandler, Registration, RegistrationKind};
pub use message::{Message, ProcessIdResolver, SenderHandle, SenderResolver, NO_RESPONSE_ID};
pub use outgoing::OutgoingMessage;
pub use service::MessagingService;
