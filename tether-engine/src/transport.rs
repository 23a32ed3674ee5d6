use std::io::{Read, Write};

/// The duplex byte stream collaborator the engine runs over.
///
/// The engine is transport-agnostic: anything that can hand out a
/// nonblocking `Read + Write` stream per connection attempt will do.
/// Reads and writes are expected to return `WouldBlock` instead of
/// blocking; the reconnection controller calls `open` again for every
/// fresh connection attempt.
pub trait Transport {
    /// The stream type produced by this transport
    type Stream: Read + Write;

    /// Opens a fresh stream to the broker
    ///
    /// # Errors
    /// Any I/O error encountered while establishing the stream
    fn open(&mut self) -> std::io::Result<Self::Stream>;
}
