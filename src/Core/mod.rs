pub mod codec;
pub mod process;
pub mod transport;

pub use codec::{ByteReader, MessageBuffer, MessageHeader, INITIAL_CAPACITY};
pub use process::{OsProcessSpawner, ProcessSpawner};
pub use transport::{LoopbackTransport, Transport};
