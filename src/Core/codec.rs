// Wire codec for host messages.
//
// All integers are big-endian. Strings are written as an i32 length equal to
// the encoded byte count plus one, followed by that many bytes; the last byte
// is a terminator that the decoder discards. A null string is length -1 with
// no bytes following.
//
// The length counts UTF-8 bytes, not characters. For ASCII the two agree; a
// peer that counts characters will disagree on any non-ASCII string.

use crate::error::{HostError, Result};

/// Capacity a fresh outgoing buffer starts with.
pub const INITIAL_CAPACITY: usize = 512;

/// Length marker for a null string.
pub const NULL_STRING_LENGTH: i32 = -1;

/// Terminator byte appended to every non-null string.
const STRING_TERMINATOR: u8 = 0;

/// Growable write buffer used to build outgoing messages.
///
/// The backing storage is kept at its full capacity; `offset` is the logical
/// end of written data and the only part ever handed to a transport.
pub struct MessageBuffer {
    bytes: Vec<u8>,
    offset: usize,
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity.max(1)],
            offset: 0,
        }
    }

    /// Current capacity of the backing storage in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Logical write offset: number of bytes written so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Grow so that `extra` more bytes fit. Capacity at least doubles and
    /// keeps doubling while still insufficient; written bytes are preserved.
    fn ensure(&mut self, extra: usize) {
        let needed = self.offset + extra;
        if needed <= self.bytes.len() {
            return;
        }
        let mut new_capacity = self.bytes.len() * 2;
        while new_capacity < needed {
            new_capacity *= 2;
        }
        self.bytes.resize(new_capacity, 0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.ensure(data.len());
        self.bytes[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// Write a nullable string in the length-plus-terminator scheme.
    pub fn write_utf(&mut self, value: Option<&str>) -> Result<()> {
        match value {
            None => self.write_i32(NULL_STRING_LENGTH),
            Some(s) => {
                let length = i32::try_from(s.len() + 1).map_err(|_| {
                    HostError::protocol(format!("string of {} bytes is too long", s.len()))
                })?;
                self.write_i32(length);
                self.write_bytes(s.as_bytes());
                self.write_u8(STRING_TERMINATOR);
            }
        }
        Ok(())
    }

    /// Write an i32 length followed by the raw bytes.
    pub fn write_byte_array(&mut self, data: &[u8]) -> Result<()> {
        let length = i32::try_from(data.len()).map_err(|_| {
            HostError::protocol(format!("byte array of {} bytes is too long", data.len()))
        })?;
        self.write_i32(length);
        self.write_bytes(data);
        Ok(())
    }

    /// The written bytes, never the spare capacity behind them.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.offset]
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.bytes.truncate(self.offset);
        self.bytes
    }
}

/// Read cursor over a received frame, with a re-readable mark.
pub struct ByteReader {
    bytes: Vec<u8>,
    position: usize,
    mark: usize,
}

impl ByteReader {
    /// Start reading `bytes` at `start`.
    ///
    /// # Returns
    /// * `Err(HostError::Protocol)` if `start` lies past the end of the frame
    pub fn new(bytes: Vec<u8>, start: usize) -> Result<Self> {
        if start > bytes.len() {
            return Err(HostError::protocol(format!(
                "data offset {} past end of {}-byte frame",
                start,
                bytes.len()
            )));
        }
        Ok(Self {
            bytes,
            position: start,
            mark: start,
        })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Remember the current position for a later `reset`.
    pub fn mark(&mut self) {
        self.mark = self.position;
    }

    pub fn mark_position(&self) -> usize {
        self.mark
    }

    /// Rewind the cursor to the mark.
    pub fn reset(&mut self) {
        self.position = self.mark;
    }

    pub fn bytes_from(&self, start: usize) -> &[u8] {
        &self.bytes[start.min(self.bytes.len())..]
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if len > self.remaining() {
            return Err(HostError::protocol(format!(
                "truncated frame: wanted {} bytes at offset {}, {} left",
                len,
                self.position,
                self.remaining()
            )));
        }
        let start = self.position;
        self.position += len;
        Ok(&self.bytes[start..start + len])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        let length = self.read_i32()?;
        let length = usize::try_from(length)
            .map_err(|_| HostError::protocol(format!("negative byte array length {}", length)))?;
        self.read_bytes(length)
    }

    /// Read a nullable string, discarding the trailing terminator byte.
    pub fn read_utf(&mut self) -> Result<Option<String>> {
        let length = self.read_i32()?;
        if length == NULL_STRING_LENGTH {
            return Ok(None);
        }
        if length < 1 {
            return Err(HostError::protocol(format!(
                "invalid string length {}",
                length
            )));
        }
        let raw = self.take(length as usize)?;
        let text = &raw[..raw.len() - 1];
        String::from_utf8(text.to_vec())
            .map(Some)
            .map_err(|e| HostError::protocol(format!("string is not valid UTF-8: {}", e)))
    }
}

/// Fixed header preceding every payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_id: i32,
    pub response_id: i32,
    pub sender_id: i32,
    pub return_type: Option<String>,
    pub message_type: Option<String>,
}

impl MessageHeader {
    pub fn encode_into(&self, buffer: &mut MessageBuffer) -> Result<()> {
        buffer.write_i32(self.message_id);
        buffer.write_i32(self.response_id);
        buffer.write_i32(self.sender_id);
        buffer.write_utf(self.return_type.as_deref())?;
        buffer.write_utf(self.message_type.as_deref())
    }

    pub fn decode(reader: &mut ByteReader) -> Result<Self> {
        Ok(Self {
            message_id: reader.read_i32()?,
            response_id: reader.read_i32()?,
            sender_id: reader.read_i32()?,
            return_type: reader.read_utf()?,
            message_type: reader.read_utf()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_layout_is_length_plus_terminator() {
        let mut buffer = MessageBuffer::new();
        buffer.write_utf(Some("ping")).unwrap();
        assert_eq!(buffer.as_slice(), &[0, 0, 0, 5, b'p', b'i', b'n', b'g', 0]);
    }

    #[test]
    fn string_length_counts_utf8_bytes() {
        let mut buffer = MessageBuffer::new();
        buffer.write_utf(Some("é€")).unwrap();
        // two characters, five bytes, plus the terminator
        assert_eq!(&buffer.as_slice()[..4], &[0, 0, 0, 6]);
        assert_eq!(buffer.offset(), 4 + 6);

        let mut reader = ByteReader::new(buffer.into_vec(), 0).unwrap();
        assert_eq!(reader.read_utf().unwrap().as_deref(), Some("é€"));
    }

    #[test]
    fn null_string_is_minus_one() {
        let mut buffer = MessageBuffer::new();
        buffer.write_utf(None).unwrap();
        assert_eq!(buffer.as_slice(), &[0xff, 0xff, 0xff, 0xff]);

        let mut reader = ByteReader::new(buffer.into_vec(), 0).unwrap();
        assert_eq!(reader.read_utf().unwrap(), None);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn growth_doubles_and_keeps_written_bytes() {
        let mut buffer = MessageBuffer::with_capacity(8);
        buffer.write_i32(0x0102_0304);
        buffer.write_i32(0x0506_0708);
        assert_eq!(buffer.capacity(), 8);

        buffer.write_u8(9);
        assert_eq!(buffer.capacity(), 16);

        // far larger than one doubling
        buffer.write_bytes(&[7u8; 100]);
        assert!(buffer.capacity() >= 109);
        assert_eq!(buffer.capacity(), 128);
        assert_eq!(&buffer.as_slice()[..9], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(buffer.offset(), 109);
    }

    #[test]
    fn zero_length_string_is_rejected() {
        let mut reader = ByteReader::new(vec![0, 0, 0, 0], 0).unwrap();
        assert!(matches!(reader.read_utf(), Err(HostError::Protocol { .. })));
    }

    #[test]
    fn truncated_string_is_rejected() {
        let mut reader = ByteReader::new(vec![0, 0, 0, 9, b'a', b'b'], 0).unwrap();
        assert!(matches!(reader.read_utf(), Err(HostError::Protocol { .. })));
    }

    #[test]
    fn reset_rewinds_to_mark() {
        let mut reader = ByteReader::new(vec![0, 0, 0, 1, 0, 0, 0, 2], 0).unwrap();
        assert_eq!(reader.read_i32().unwrap(), 1);
        reader.mark();
        assert_eq!(reader.read_i32().unwrap(), 2);
        reader.reset();
        assert_eq!(reader.read_i32().unwrap(), 2);
    }

    #[test]
    fn start_past_end_is_rejected() {
        assert!(ByteReader::new(vec![1, 2], 3).is_err());
    }
}
