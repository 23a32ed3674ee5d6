use log::warn;
use std::io::Read;
use tether_buffers::RingBuffer;
use tether_protocol::{decode, CodecError, Decoded, Packet};

/// Turns a nonblocking byte stream into MQTT packets.
///
/// Bytes are accumulated in a ring buffer; a packet is surfaced only once
/// all of its bytes have arrived, so a partial packet never consumes any
/// input. The underlying decoder reports `Incomplete` for short input and
/// a `CodecError` for malformed input.
#[derive(Debug)]
pub struct Packetizer {
    buffer: RingBuffer,
}

impl Packetizer {
    const DEFAULT_CAPACITY: usize = 1024 * 1024;
    const MIN_CAPACITY: usize = 5;

    /// Creates a packetizer with the default buffer capacity
    pub fn new() -> Packetizer {
        Packetizer::with_capacity(Packetizer::DEFAULT_CAPACITY)
    }

    /// Creates a packetizer with the specified buffer capacity
    ///
    /// # Panics
    /// Panics if the capacity is smaller than the largest possible fixed
    /// header (5 bytes)
    pub fn with_capacity(capacity: usize) -> Packetizer {
        assert!(
            capacity >= Packetizer::MIN_CAPACITY,
            "Packetizer buffer must hold at least {} bytes",
            Packetizer::MIN_CAPACITY
        );

        Packetizer {
            buffer: RingBuffer::new(capacity),
        }
    }

    /// The amount of free space left in the buffer
    pub fn free_space(&self) -> usize {
        self.buffer.free_space()
    }

    /// Appends as many of the given bytes as fit, returning how many were
    /// accepted
    pub fn push_bytes(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        let size = std::cmp::min(self.free_space(), bytes.len());
        self.buffer.push_slice(&bytes[..size])?;
        Ok(size)
    }

    /// Reads from the reader into the buffer until the reader is exhausted
    /// or the buffer is full
    ///
    /// # Errors
    /// Reader errors (including WouldBlock) pass through; WriteZero when
    /// the buffer is already full
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        self.buffer.fill_from(reader)
    }

    /// Attempts to decode the next packet from the buffered bytes
    ///
    /// # Errors
    /// - Any decoder error for malformed bytes
    /// - `OversizedPacket` when the buffered packet can never fit in the
    ///   buffer, which means it can never be decoded
    pub fn next_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        if self.buffer.len() < 2 {
            // not enough for a fixed header, wait for more bytes
            return Ok(None);
        }

        let pending = self.buffer.peek(self.buffer.len()).to_vec();
        match decode(&pending)? {
            Decoded::Packet { packet, consumed } => {
                self.buffer.consume(consumed);
                Ok(Some(packet))
            }
            Decoded::Incomplete => {
                if self.buffer.is_full() {
                    // the packet is bigger than the whole buffer and will
                    // never complete
                    warn!(
                        "Packet exceeds the {} byte receive buffer",
                        self.buffer.capacity()
                    );
                    return Err(CodecError::OversizedPacket);
                }
                Ok(None)
            }
        }
    }
}

impl Default for Packetizer {
    fn default() -> Packetizer {
        Packetizer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::{encode, Publish};

    fn encoded_publish(payload_size: usize) -> Vec<u8> {
        let packet = Packet::Publish(Publish::new("mytopic", vec![5u8; payload_size]));
        let mut bytes = Vec::new();
        encode(&packet, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_packetizer_packet_too_large() {
        let mut sut = Packetizer::with_capacity(20);
        let bytes = encoded_publish(1024);

        let accepted = sut.push_bytes(&bytes).unwrap();
        assert_eq!(accepted, 20);
        let result = sut.next_packet();
        assert_eq!(result.unwrap_err(), CodecError::OversizedPacket);
    }

    fn partial_packet_test(first_write_size: usize) {
        let mut sut = Packetizer::with_capacity(1024);
        let bytes = encoded_publish(900);

        let accepted = sut.push_bytes(&bytes[..first_write_size]).unwrap();
        assert_eq!(accepted, first_write_size);
        let result = sut.next_packet().unwrap();
        assert!(result.is_none());

        let accepted = sut.push_bytes(&bytes[first_write_size..]).unwrap();
        assert_eq!(accepted, bytes.len() - first_write_size);
        let result = sut.next_packet().unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn test_packetizer_partial_body() {
        partial_packet_test(10);
    }

    #[test]
    fn test_packetizer_partial_fixed_header() {
        partial_packet_test(2);
    }

    #[test]
    fn test_packetizer_single_byte() {
        partial_packet_test(1);
    }

    #[test]
    fn test_packetizer_back_to_back_packets() {
        let mut sut = Packetizer::with_capacity(1024);
        let mut bytes = encoded_publish(10);
        bytes.extend(encoded_publish(20));
        sut.push_bytes(&bytes).unwrap();

        let first = sut.next_packet().unwrap().unwrap();
        let second = sut.next_packet().unwrap().unwrap();
        match (first, second) {
            (Packet::Publish(a), Packet::Publish(b)) => {
                assert_eq!(a.payload.len(), 10);
                assert_eq!(b.payload.len(), 20);
            }
            _ => panic!("expected two publishes"),
        }
        assert!(sut.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_packetizer_malformed_bytes() {
        let mut sut = Packetizer::with_capacity(64);
        // PUBLISH with QoS 3
        sut.push_bytes(&[0x36, 0x05, 0x00, 0x01, b'a', 0x00, 0x01])
            .unwrap();
        assert_eq!(sut.next_packet().unwrap_err(), CodecError::BadQoS(3));
    }
}
