use crate::Core::codec::{ByteReader, MessageHeader};
use crate::error::{HostError, Result};

/// Response id carried by messages that answer nothing.
pub const NO_RESPONSE_ID: i32 = -1;

/// Identity of a message's sender, as resolved by a [`SenderResolver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SenderHandle {
    /// An OS process known by pid.
    Process(u32),
    /// A wire id the resolver could not map to a process.
    Unknown(i32),
}

/// Maps sender identities to and from their 32-bit wire form.
///
/// The message core never interprets sender ids itself; the host's process
/// identity layer supplies this strategy.
pub trait SenderResolver: Send + Sync {
    fn serialize_sender(&self, sender: &SenderHandle) -> i32;
    fn resolve_sender(&self, id: i32) -> SenderHandle;
}

/// Treats the wire id as a pid.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessIdResolver;

impl SenderResolver for ProcessIdResolver {
    fn serialize_sender(&self, sender: &SenderHandle) -> i32 {
        match *sender {
            SenderHandle::Process(pid) => i32::try_from(pid).unwrap_or(-1),
            SenderHandle::Unknown(id) => id,
        }
    }

    fn resolve_sender(&self, id: i32) -> SenderHandle {
        match u32::try_from(id) {
            Ok(pid) => SenderHandle::Process(pid),
            Err(_) => SenderHandle::Unknown(id),
        }
    }
}

/// A decoded inbound message.
///
/// Header fields are fixed at decode time. The payload is read through a
/// cursor; after the header the cursor position is both the start of user
/// data and the mark that [`Message::reset`] rewinds to.
pub struct Message {
    id: i32,
    response_id: i32,
    sender: SenderHandle,
    message_type: String,
    return_type: Option<String>,
    user_data_start: usize,
    reader: ByteReader,
}

impl Message {
    /// Decode a frame received from a transport.
    ///
    /// # Arguments
    /// * `frame` - The raw frame, including any transport prefix
    /// * `data_offset` - Number of leading bytes owned by the transport
    /// * `resolver` - Strategy used to turn the sender id into a handle
    ///
    /// # Returns
    /// * `Err(HostError::Protocol)` if the header is malformed or truncated
    pub fn decode(
        frame: Vec<u8>,
        data_offset: usize,
        resolver: &dyn SenderResolver,
    ) -> Result<Self> {
        let mut reader = ByteReader::new(frame, data_offset)?;
        let header = MessageHeader::decode(&mut reader)?;
        let message_type = header
            .message_type
            .ok_or_else(|| HostError::protocol("message has a null type"))?;
        reader.mark();
        Ok(Self {
            id: header.message_id,
            response_id: header.response_id,
            sender: resolver.resolve_sender(header.sender_id),
            message_type,
            return_type: header.return_type,
            user_data_start: reader.position(),
            reader,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn response_id(&self) -> i32 {
        self.response_id
    }

    pub fn is_response_message(&self) -> bool {
        self.response_id >= 0
    }

    pub fn sender(&self) -> SenderHandle {
        self.sender
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn return_type(&self) -> Option<&str> {
        self.return_type.as_deref()
    }

    /// The whole payload, independent of the read cursor.
    pub fn payload(&self) -> &[u8] {
        self.reader.bytes_from(self.user_data_start)
    }

    pub fn remaining(&self) -> usize {
        self.reader.remaining()
    }

    /// Move the mark to the current cursor position.
    pub fn mark(&mut self) {
        self.reader.mark();
    }

    /// Rewind the cursor to the mark (the payload start unless moved).
    pub fn reset(&mut self) {
        self.reader.reset();
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.reader.read_u8()
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.reader.read_bool()
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.reader.read_i32()
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.reader.read_i64()
    }

    pub fn read_utf(&mut self) -> Result<Option<String>> {
        self.reader.read_utf()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.reader.read_bytes(len)
    }

    pub fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        self.reader.read_byte_array()
    }
}
