use std::io::{ErrorKind, Write};
use tether_buffers::RingBuffer;
use tether_protocol::{encode, Packet};

/// Queues encoded MQTT packets and drains them into a nonblocking writer
pub struct Streamer {
    buffer: RingBuffer,
}

impl Streamer {
    /// Creates a streamer with the specified buffer capacity
    pub fn with_capacity(capacity: usize) -> Streamer {
        Streamer {
            buffer: RingBuffer::new(capacity),
        }
    }

    /// Encodes the packet into the outbound buffer
    ///
    /// # Errors
    /// - Returns InvalidInput if the packet cannot be encoded or is bigger
    ///   than the whole buffer (it could never be written)
    /// - Returns WriteZero if there currently isn't enough free space
    pub fn write_packet(&mut self, packet: &Packet) -> std::io::Result<()> {
        let mut bytes = Vec::new();
        encode(packet, &mut bytes).map_err(|_e| std::io::Error::from(ErrorKind::InvalidInput))?;

        if bytes.len() > self.buffer.capacity() {
            return Err(ErrorKind::InvalidInput.into());
        } else if bytes.len() > self.buffer.free_space() {
            return Err(ErrorKind::WriteZero.into());
        }

        self.buffer.push_slice(&bytes)
    }

    /// TRUE if no outbound bytes are pending
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The number of outbound bytes still pending
    pub fn data_size(&self) -> usize {
        self.buffer.len()
    }

    /// Drains pending bytes into the writer, returning how many were written
    pub fn write_into<W: Write>(&mut self, writer: &mut W) -> std::io::Result<usize> {
        self.buffer.drain_into(writer)
    }
}
