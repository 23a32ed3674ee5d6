use std::io::{ErrorKind, Read, Write};

/// A view into the ring buffer, which is either one consecutive slice or
/// two slices when the data wraps around the end of the backing storage
#[derive(Debug)]
pub enum Segments<'a> {
    /// The requested range is consecutive in the backing storage
    Single(&'a [u8]),

    /// The requested range wraps around the end of the backing storage
    Wrapped(&'a [u8], &'a [u8]),
}

impl Segments<'_> {
    /// Total number of bytes across both segments
    pub fn len(&self) -> usize {
        match self {
            Segments::Single(x) => x.len(),
            Segments::Wrapped(x, y) => x.len() + y.len(),
        }
    }

    /// TRUE if the view contains no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the view into a fresh Vec
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Segments::Single(x) => x.to_vec(),
            Segments::Wrapped(x, y) => {
                let mut out = Vec::with_capacity(x.len() + y.len());
                out.extend_from_slice(x);
                out.extend_from_slice(y);
                out
            }
        }
    }
}

impl Read for Segments<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Segments::Single(ref mut bytes) => bytes.read(buf),
            Segments::Wrapped(ref mut head, ref mut tail) => {
                if buf.len() <= head.len() {
                    head.read(buf)
                } else {
                    let (head_buf, tail_buf) = buf.split_at_mut(head.len());
                    let head_count = head.read(head_buf)?;
                    let tail_count = tail.read(tail_buf)?;
                    Ok(head_count + tail_count)
                }
            }
        }
    }
}

/// A fixed-capacity circular buffer of bytes
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// Creates a new ring buffer with the given capacity
    ///
    /// # Panics
    /// Panics if the capacity is zero
    pub fn new(capacity: usize) -> RingBuffer {
        assert!(capacity > 0, "Ring buffer capacity must be positive");

        RingBuffer {
            storage: vec![0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// The buffer capacity, in bytes
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The amount of data currently buffered
    pub fn len(&self) -> usize {
        self.len
    }

    /// TRUE if the buffer holds no data
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// TRUE if the buffer cannot accept more data
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// The amount of data that can still be written
    pub fn free_space(&self) -> usize {
        self.capacity() - self.len
    }

    /// Returns a view of the first `length` buffered bytes without removing them
    ///
    /// # Panics
    /// Panics if the buffer holds less data than requested
    pub fn peek(&self, length: usize) -> Segments<'_> {
        assert!(length <= self.len, "Not enough buffered data");
        self.segments_at(self.head, length)
    }

    /// Copies up to `out.len()` buffered bytes into `out` without removing
    /// them, returning the number of bytes copied
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let length = std::cmp::min(out.len(), self.len);
        let mut view = self.segments_at(self.head, length);
        // Reading from an in-memory view cannot fail
        view.read(&mut out[..length]).unwrap_or(0)
    }

    /// Removes and returns the first `length` buffered bytes
    ///
    /// # Panics
    /// Panics if `length` is zero or the buffer holds less data than requested
    pub fn take(&mut self, length: usize) -> Segments<'_> {
        assert!(length > 0, "Attempted to take zero bytes");
        assert!(length <= self.len, "Not enough buffered data");

        let from = self.head;
        self.head = (self.head + length) % self.capacity();
        self.len -= length;
        self.segments_at(from, length)
    }

    /// Discards the first `length` buffered bytes
    ///
    /// # Panics
    /// Panics if the buffer holds less data than requested
    pub fn consume(&mut self, length: usize) {
        assert!(length <= self.len, "Not enough buffered data");
        self.head = (self.head + length) % self.capacity();
        self.len -= length;
    }

    /// Appends all the given bytes to the buffer
    ///
    /// # Errors
    /// Returns WriteZero without writing anything if the free space is
    /// smaller than the input
    pub fn push_slice(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.free_space() < bytes.len() {
            return Err(ErrorKind::WriteZero.into());
        }

        let tail = (self.head + self.len) % self.capacity();
        let until_end = self.capacity() - tail;
        if bytes.len() <= until_end {
            self.storage[tail..tail + bytes.len()].copy_from_slice(bytes);
        } else {
            let (first, second) = bytes.split_at(until_end);
            self.storage[tail..].copy_from_slice(first);
            self.storage[..second.len()].copy_from_slice(second);
        }

        self.len += bytes.len();
        Ok(())
    }

    /// Fills the buffer from the reader until the reader has nothing more
    /// to give or the buffer is full. Returns the number of bytes read.
    ///
    /// # Errors
    /// Returns WriteZero when called on a full buffer; reader errors are
    /// passed through
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        if self.free_space() == 0 {
            return Err(ErrorKind::WriteZero.into());
        }

        let mut total = 0usize;
        loop {
            let (from, to) = self.next_free_range();
            if from == to {
                return Ok(total);
            }

            let target = &mut self.storage[from..to];
            match reader.read(target) {
                Ok(0) => return Ok(total),
                Ok(size) => {
                    self.len += size;
                    total += size;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drains buffered bytes into the writer, stopping when the buffer is
    /// empty or the writer stops accepting data. Returns the number of
    /// bytes written; a short count means the writer blocked.
    pub fn drain_into<W: Write>(&mut self, writer: &mut W) -> std::io::Result<usize> {
        let mut total = 0usize;
        loop {
            let length = std::cmp::min(self.len, self.capacity() - self.head);
            if length == 0 {
                return Ok(total);
            }

            let chunk = &self.storage[self.head..self.head + length];
            match writer.write(chunk) {
                Ok(0) => return Ok(total),
                Ok(size) => {
                    self.head = (self.head + size) % self.capacity();
                    self.len -= size;
                    total += size;
                    if size < length {
                        return Ok(total);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock && total > 0 => {
                    return Ok(total);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn segments_at(&self, from: usize, length: usize) -> Segments<'_> {
        let end = from + length;
        if end <= self.capacity() {
            Segments::Single(&self.storage[from..end])
        } else {
            let wrapped = end % self.capacity();
            Segments::Wrapped(&self.storage[from..], &self.storage[..wrapped])
        }
    }

    fn next_free_range(&self) -> (usize, usize) {
        let tail = (self.head + self.len) % self.capacity();
        if self.len == self.capacity() {
            (tail, tail)
        } else if tail < self.head {
            (tail, self.head)
        } else {
            (tail, self.capacity())
        }
    }
}

impl Write for RingBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = std::cmp::min(self.free_space(), buf.len());
        self.push_slice(&buf[..size])?;
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for RingBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.peek_into(buf);
        if size > 0 {
            self.consume(size);
        }
        Ok(size)
    }
}
