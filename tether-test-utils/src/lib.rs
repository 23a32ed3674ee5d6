//! Test doubles for the tether engine: an in-memory socket pair where
//! every read/write outcome is scripted by the test.

use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};

use tether_buffers::RingBuffer;
use tether_protocol::{encode, Packet};

type IoCtl = std::io::Result<usize>;

/// Factory for a connected mock socket pair
pub struct MockSocket {}

/// The client end: handed to the engine under test.
/// Reads and writes resolve against control results pushed by the server
/// end; with no control queued, both return WouldBlock.
pub struct MockClientSocket {
    outbound_tx: Sender<Vec<u8>>,
    inbound_rx: Receiver<Vec<u8>>,
    read_ctl_rx: Receiver<IoCtl>,
    write_ctl_rx: Receiver<IoCtl>,
    inbound_buf: RingBuffer,
}

impl MockClientSocket {
    fn buffer_inbound(&mut self, wanted: usize) {
        while self.inbound_buf.len() < wanted {
            match self.inbound_rx.try_recv() {
                Ok(bytes) => self.inbound_buf.push_slice(&bytes).unwrap(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => panic!("mock peer dropped"),
            }
        }
    }
}

impl Read for MockClientSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.read_ctl_rx.try_recv() {
            // an explicit Ok(0) control scripts end-of-stream
            Ok(Ok(0)) => Ok(0),
            Ok(Ok(allowed)) => {
                let wanted = std::cmp::min(buf.len(), allowed);
                self.buffer_inbound(wanted);
                let size = std::cmp::min(wanted, self.inbound_buf.len());
                if size == 0 {
                    return Err(ErrorKind::WouldBlock.into());
                }
                let copied = self.inbound_buf.peek_into(&mut buf[..size]);
                self.inbound_buf.consume(copied);
                Ok(copied)
            }
            Ok(Err(e)) => Err(e),
            Err(TryRecvError::Empty) => Err(ErrorKind::WouldBlock.into()),
            Err(TryRecvError::Disconnected) => panic!("mock peer dropped"),
        }
    }
}

impl Write for MockClientSocket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.write_ctl_rx.try_recv() {
            Ok(Ok(allowed)) => {
                let size = std::cmp::min(buf.len(), allowed);
                self.outbound_tx.send(buf[..size].to_vec()).unwrap();
                Ok(size)
            }
            Ok(Err(e)) => Err(e),
            Err(TryRecvError::Empty) => Err(ErrorKind::WouldBlock.into()),
            Err(TryRecvError::Disconnected) => panic!("mock peer dropped"),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// The server end: the test's handle for scripting the client socket and
/// observing what the engine sent
pub struct MockServerSocket {
    inbound_tx: Sender<Vec<u8>>,
    outbound_rx: Receiver<Vec<u8>>,
    read_ctl_tx: Sender<IoCtl>,
    write_ctl_tx: Sender<IoCtl>,
    received_buf: RingBuffer,
}

impl MockServerSocket {
    /// Allows (or fails) the client's next read
    pub fn push_read_ctl(&mut self, ctl: IoCtl) {
        self.read_ctl_tx.send(ctl).unwrap();
    }

    /// Allows (or fails) the client's next write
    pub fn push_write_ctl(&mut self, ctl: IoCtl) {
        self.write_ctl_tx.send(ctl).unwrap();
    }

    /// Queues raw bytes for the client to read
    pub fn push_data(&mut self, bytes: &[u8]) {
        self.inbound_tx.send(bytes.to_vec()).unwrap();
    }

    /// Encodes a packet and queues its bytes for the client to read
    pub fn push_packet(&mut self, packet: &Packet) {
        let mut bytes = Vec::new();
        encode(packet, &mut bytes).unwrap();
        self.push_data(&bytes);
    }

    /// Generously scripts one write and one read round of 8 KiB each
    pub fn allow_io_round(&mut self) {
        self.push_write_ctl(Ok(8 * 1024));
        self.push_read_ctl(Ok(8 * 1024));
        self.push_read_ctl(Err(ErrorKind::WouldBlock.into()));
    }

    fn buffer_received(&mut self) {
        loop {
            match self.outbound_rx.try_recv() {
                Ok(bytes) => self.received_buf.push_slice(&bytes).unwrap(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl Read for MockServerSocket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.buffer_received();
        let size = self.received_buf.peek_into(buf);
        if size > 0 {
            self.received_buf.consume(size);
        }
        Ok(size)
    }
}

impl MockSocket {
    /// Creates a connected client/server mock socket pair
    pub fn create() -> (MockClientSocket, MockServerSocket) {
        let (server_data_tx, client_data_rx) = mpsc::channel();
        let (client_data_tx, server_data_rx) = mpsc::channel();
        let (write_ctl_tx, write_ctl_rx) = mpsc::channel();
        let (read_ctl_tx, read_ctl_rx) = mpsc::channel();

        let client = MockClientSocket {
            outbound_tx: client_data_tx,
            inbound_rx: client_data_rx,
            write_ctl_rx,
            read_ctl_rx,
            inbound_buf: RingBuffer::new(1024 * 1024),
        };

        let server = MockServerSocket {
            inbound_tx: server_data_tx,
            outbound_rx: server_data_rx,
            read_ctl_tx,
            write_ctl_tx,
            received_buf: RingBuffer::new(1024 * 1024),
        };

        (client, server)
    }
}
