//! Incremental JSON codec for byte streams
//!
//! Messages are JSON objects written back to back with no length prefix.
//! Boundaries are found by parsing: a message is complete once its
//! outermost object closes. Bytes that cannot start or continue a message
//! are skipped up to the next `{`.

use crate::{Message, ProtocolError};
use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum amount of incomplete data retained (1MB)
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Codec for encoding/decoding JSON messages over byte streams
#[derive(Debug)]
pub struct JsonCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum incomplete message size allowed
    max_buffer_size: usize,
    /// Bytes thrown away during resynchronisation
    discarded: usize,
}

/// Result of a single parse attempt over the buffer head
enum Attempt {
    Complete(Value, usize),
    Incomplete,
    Invalid,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonCodec {
    /// Create a new codec with default settings
    pub fn new() -> Self {
        Self::with_max_buffer_size(MAX_BUFFER_SIZE)
    }

    /// Create a new codec with a custom buffer limit
    pub fn with_max_buffer_size(max_buffer_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_buffer_size,
            discarded: 0,
        }
    }

    /// Encode a message followed by a newline
    pub fn encode_message(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        let mut encoded = serde_json::to_vec(message)?;
        encoded.push(b'\n');
        Ok(Bytes::from(encoded))
    }

    /// Write a message to an async writer
    pub async fn write_message<W>(&self, writer: &mut W, message: &Message) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_message(message)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Append freshly read bytes to the buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Try to decode one message from the internal buffer
    ///
    /// Returns `Ok(None)` when the buffer holds no complete message yet.
    /// Garbage is skipped silently. Fails only when the retained partial
    /// message grows past the configured limit.
    pub fn try_decode(&mut self) -> Result<Option<Value>, ProtocolError> {
        loop {
            // Skip to the first possible message start
            match self.read_buf.iter().position(|&b| b == b'{') {
                Some(0) => {}
                Some(start) => {
                    self.discard(start);
                }
                None => {
                    let len = self.read_buf.len();
                    self.discard(len);
                    return Ok(None);
                }
            }

            let attempt = {
                let mut stream = serde_json::Deserializer::from_slice(&self.read_buf)
                    .into_iter::<Value>();
                match stream.next() {
                    Some(Ok(value)) => Attempt::Complete(value, stream.byte_offset()),
                    Some(Err(e)) if e.is_eof() => Attempt::Incomplete,
                    Some(Err(_)) => Attempt::Invalid,
                    None => Attempt::Incomplete,
                }
            };

            match attempt {
                Attempt::Complete(value, consumed) => {
                    self.read_buf.advance(consumed);
                    return Ok(Some(value));
                }
                Attempt::Incomplete => {
                    if self.read_buf.len() > self.max_buffer_size {
                        return Err(ProtocolError::MessageTooLarge {
                            size: self.read_buf.len(),
                            max: self.max_buffer_size,
                        });
                    }
                    return Ok(None);
                }
                Attempt::Invalid => {
                    // Resynchronise on the next object start
                    let next = self.read_buf[1..]
                        .iter()
                        .position(|&b| b == b'{')
                        .map(|pos| pos + 1)
                        .unwrap_or(self.read_buf.len());
                    self.discard(next);
                }
            }
        }
    }

    /// Decode every complete message currently buffered
    pub fn decode_all(&mut self) -> Result<Vec<Value>, ProtocolError> {
        let mut values = Vec::new();
        while let Some(value) = self.try_decode()? {
            values.push(value);
        }
        Ok(values)
    }

    /// Read the next message from an async reader
    ///
    /// Returns `Ok(None)` on EOF. A trailing partial message at EOF is
    /// dropped.
    pub async fn read_message<R>(&mut self, reader: &mut R) -> Result<Option<Value>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(value) = self.try_decode()? {
                return Ok(Some(value));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                // EOF reached
                self.read_buf.clear();
                return Ok(None);
            }

            self.extend(&temp_buf[..n]);
        }
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    /// Total bytes skipped as unparseable so far
    pub fn discarded_bytes(&self) -> usize {
        self.discarded
    }

    /// Clear the internal buffer
    pub fn clear_buffer(&mut self) {
        self.read_buf.clear();
    }

    fn discard(&mut self, count: usize) {
        self.read_buf.advance(count);
        self.discarded += count;
    }
}
