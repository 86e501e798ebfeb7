use crate::Core::codec::{ByteReader, MessageBuffer, MessageHeader};
use crate::error::{HostError, Result};

use super::message::{SenderHandle, SenderResolver};

/// A message under construction.
///
/// The header is written when the builder is created; payload fields are
/// appended after it in call order. `header_offset` marks where the header
/// ends so the sending side can check nothing overwrote it.
pub struct OutgoingMessage {
    header: MessageHeader,
    sender: SenderHandle,
    buffer: MessageBuffer,
    header_offset: usize,
}

impl OutgoingMessage {
    /// Start a message and write its header. Usually reached through
    /// [`super::MessagingService`], which assigns ids and the sender.
    pub fn new(
        id: i32,
        sender: SenderHandle,
        message_type: &str,
        return_type: Option<&str>,
        response_id: i32,
        resolver: &dyn SenderResolver,
        initial_capacity: usize,
    ) -> Result<Self> {
        let header = MessageHeader {
            message_id: id,
            response_id,
            sender_id: resolver.serialize_sender(&sender),
            return_type: return_type.map(str::to_owned),
            message_type: Some(message_type.to_owned()),
        };
        let mut buffer = MessageBuffer::with_capacity(initial_capacity);
        header.encode_into(&mut buffer)?;
        let header_offset = buffer.offset();
        Ok(Self {
            header,
            sender,
            buffer,
            header_offset,
        })
    }

    pub fn id(&self) -> i32 {
        self.header.message_id
    }

    pub fn response_id(&self) -> i32 {
        self.header.response_id
    }

    pub fn is_response_message(&self) -> bool {
        self.header.response_id >= 0
    }

    pub fn sender(&self) -> SenderHandle {
        self.sender
    }

    pub fn message_type(&self) -> &str {
        self.header.message_type.as_deref().unwrap_or_default()
    }

    pub fn return_type(&self) -> Option<&str> {
        self.header.return_type.as_deref()
    }

    /// Byte position right after the header.
    pub fn header_offset(&self) -> usize {
        self.header_offset
    }

    /// Bytes written so far, header included.
    pub fn len(&self) -> usize {
        self.buffer.offset()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.offset() == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.write_u8(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.buffer.write_bool(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buffer.write_i32(value);
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buffer.write_i64(value);
        self
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.write_bytes(data);
        self
    }

    pub fn write_utf(&mut self, value: Option<&str>) -> Result<&mut Self> {
        self.buffer.write_utf(value)?;
        Ok(self)
    }

    pub fn write_byte_array(&mut self, data: &[u8]) -> Result<&mut Self> {
        self.buffer.write_byte_array(data)?;
        Ok(self)
    }

    /// The finished bytes, up to the logical write offset.
    pub fn serialize(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.into_vec()
    }

    /// Re-decode the header region and compare it with the builder's fields.
    pub fn verify_header(&self) -> Result<()> {
        let bytes = self.serialize();
        if bytes.len() < self.header_offset {
            return Err(HostError::protocol(format!(
                "message {} shorter than its header ({} < {})",
                self.id(),
                bytes.len(),
                self.header_offset
            )));
        }
        let mut reader = ByteReader::new(bytes[..self.header_offset].to_vec(), 0)?;
        let decoded = MessageHeader::decode(&mut reader)?;
        if decoded != self.header || reader.remaining() != 0 {
            return Err(HostError::protocol(format!(
                "header of message {} was corrupted",
                self.id()
            )));
        }
        Ok(())
    }
}
