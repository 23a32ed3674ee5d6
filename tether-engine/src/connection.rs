use std::io::ErrorKind;
use std::{
    io::{Read, Write},
    time::Duration,
    time::Instant,
};

use crate::packets::{Packetizer, Streamer};
use log::{debug, trace};
use tether_protocol::{CodecError, Connack, Connect, ConnectReturnCode, Packet};

/// A failed (or still pending) connect attempt
pub enum ConnectError<S: Read + Write> {
    /// The handshake needs more I/O; call `complete` again
    WouldBlock(Handshake<S>),

    /// The broker answered CONNACK with a non-success return code
    Refused(ConnectReturnCode),

    /// The broker sent malformed bytes
    Malformed(CodecError),

    /// The broker's first packet was not a CONNACK
    Violation,

    /// The transport failed
    Io(ErrorKind),
}

/// Builds a connection over a nonblocking stream
pub struct Connector<S: Read + Write> {
    stream: S,
    tx_buffer_size: usize,
    rx_buffer_size: usize,
    connect_timeout: Duration,
}

/// A live MQTT connection: buffered packet I/O over the stream
pub struct Connection<S: Read + Write> {
    packetizer: Packetizer,
    streamer: Streamer,
    stream: S,
}

impl<S: Read + Write> Connection<S> {
    /// Queues a packet in the tx buffer.
    pub fn write(&mut self, packet: &Packet) -> std::io::Result<()> {
        debug!("Queueing {} for send", packet.kind());
        self.streamer.write_packet(packet)
    }

    /// Decodes the next fully-buffered inbound packet, if any.
    pub fn read(&mut self) -> Result<Option<Packet>, CodecError> {
        self.packetizer.next_packet()
    }

    /// TRUE if no outbound bytes are pending
    pub fn is_drained(&self) -> bool {
        self.streamer.is_empty()
    }

    /// Sends bytes from the tx buffer until blocked or until the allotted
    /// time is exhausted. Returns the amount of data still pending.
    pub fn send_task(&mut self, budget: Duration) -> std::io::Result<usize> {
        trace!("send_task starting");
        let start = Instant::now();
        loop {
            if start.elapsed() >= budget {
                trace!("Write budget exhausted");
                return Ok(self.streamer.data_size());
            }

            if self.streamer.is_empty() {
                trace!("TX buffer empty");
                return Ok(0);
            }

            match self.streamer.write_into(&mut self.stream) {
                Ok(size) => {
                    debug!("Wrote {} bytes from TX buffer to the stream", size);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    trace!("Write interrupted");
                    // keep trying!
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    trace!("Cannot write to the stream: would block");
                    return Ok(self.streamer.data_size());
                }
                Err(e) => {
                    return Err(e);
                }
            }
        }
    }

    /// Reads stream bytes into the rx buffer until blocked, the buffer is
    /// full, or the allotted time is exhausted. Returns the amount read.
    ///
    /// # Errors
    /// ConnectionAborted when the stream reports end-of-stream
    pub fn recv_task(&mut self, budget: Duration) -> std::io::Result<usize> {
        trace!("recv_task starting");
        let start = Instant::now();
        let mut total = 0usize;
        loop {
            if start.elapsed() >= budget {
                trace!("Read budget exhausted");
                return Ok(total);
            }

            match self.packetizer.fill_from(&mut self.stream) {
                Ok(0) => {
                    debug!("Stream closed by peer");
                    return Err(ErrorKind::ConnectionAborted.into());
                }
                Ok(size) => {
                    debug!("Read {} bytes into the RX buffer", size);
                    total += size;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    trace!("Read interrupted");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    trace!("Read would block");
                    return Ok(total);
                }
                Err(e) if e.kind() == ErrorKind::WriteZero => {
                    // rx buffer is full; let the caller decode first
                    return Ok(total);
                }
                Err(e) => {
                    debug!("Read failed: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

/// A connect attempt whose CONNECT/CONNACK exchange is still in flight
pub struct Handshake<S: Read + Write> {
    packetizer: Packetizer,
    streamer: Streamer,
    stream: S,
    stopwatch: Instant,
    connect_timeout: Duration,
}

impl<S: Read + Write> Connector<S> {
    pub fn new(stream: S) -> Connector<S> {
        Connector {
            stream,
            tx_buffer_size: 512 * 1024,
            rx_buffer_size: 512 * 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_rx_buffer(mut self, size: usize) -> Self {
        self.rx_buffer_size = size;
        self
    }

    pub fn with_tx_buffer(mut self, size: usize) -> Self {
        self.tx_buffer_size = size;
        self
    }

    /// Queues the CONNECT packet and returns the pending handshake
    ///
    /// # Errors
    /// InvalidInput if the CONNECT packet cannot fit the tx buffer
    pub fn connect(self, connect: Connect) -> std::io::Result<Handshake<S>> {
        let packetizer = Packetizer::with_capacity(self.rx_buffer_size);
        let mut streamer = Streamer::with_capacity(self.tx_buffer_size);
        streamer.write_packet(&Packet::Connect(connect))?;
        Ok(Handshake {
            packetizer,
            streamer,
            stream: self.stream,
            connect_timeout: self.connect_timeout,
            stopwatch: Instant::now(),
        })
    }
}

impl<S: Read + Write> Handshake<S> {
    /// Drives the handshake one step. Returns the live connection and the
    /// broker's CONNACK once the exchange completes.
    pub fn complete(mut self) -> Result<(Connection<S>, Connack), ConnectError<S>> {
        if self.stopwatch.elapsed() > self.connect_timeout {
            return Err(ConnectError::Io(ErrorKind::TimedOut));
        }

        if !self.streamer.is_empty() {
            match self.send_next() {
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Err(ConnectError::WouldBlock(self))
                }
                Ok(()) => {
                    // CONNECT is on the wire, now we wait for CONNACK
                }
                Err(e) => return Err(ConnectError::Io(e.kind())),
            }
        }

        loop {
            match self.packetizer.fill_from(&mut self.stream) {
                Ok(0) => return Err(ConnectError::Io(ErrorKind::ConnectionAborted)),
                Ok(_size) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    // keep looping, hoping we won't get interrupted endlessly...
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(ConnectError::Io(e.kind())),
            }
        }

        match self.packetizer.next_packet() {
            Ok(None) => Err(ConnectError::WouldBlock(self)),
            Ok(Some(Packet::Connack(connack))) => self.process_connack(connack),
            Ok(Some(other)) => {
                // Any non-CONNACK response is a protocol violation
                debug!("Expected CONNACK, got {}", other.kind());
                Err(ConnectError::Violation)
            }
            Err(e) => Err(ConnectError::Malformed(e)),
        }
    }

    fn process_connack(self, connack: Connack) -> Result<(Connection<S>, Connack), ConnectError<S>> {
        match connack.return_code {
            ConnectReturnCode::Accepted => Ok((
                Connection {
                    packetizer: self.packetizer,
                    streamer: self.streamer,
                    stream: self.stream,
                },
                connack,
            )),
            other => Err(ConnectError::Refused(other)),
        }
    }

    fn send_next(&mut self) -> std::io::Result<()> {
        loop {
            let stream = &mut self.stream;
            match self.streamer.write_into(stream) {
                Ok(_written_size) => {
                    if self.streamer.is_empty() {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Err(ErrorKind::WouldBlock.into());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::Publish;
    use tether_test_utils::{MockClientSocket, MockSocket};

    fn accepted_connack() -> Packet {
        Packet::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        })
    }

    #[test]
    fn test_handshake_sanity() {
        let (client_socket, mut server_socket) = MockSocket::create();
        server_socket.push_packet(&accepted_connack());
        server_socket.push_write_ctl(Ok(8 * 1024));
        server_socket.push_read_ctl(Err(ErrorKind::WouldBlock.into()));
        server_socket.push_read_ctl(Ok(8 * 1024));
        let sut = Connector::new(client_socket)
            .connect(Connect::new("clientid"))
            .unwrap();

        let res = run_to_completion(sut);
        assert!(res.is_ok());
    }

    #[test]
    fn test_handshake_protocol_violation() {
        // Arrange
        let (client_socket, mut server_socket) = MockSocket::create();
        server_socket.push_packet(&Packet::Publish(Publish::new("mytopic", Vec::new())));
        server_socket.push_write_ctl(Ok(8 * 1024));
        server_socket.push_read_ctl(Err(ErrorKind::WouldBlock.into()));
        server_socket.push_read_ctl(Ok(8 * 1024));
        let sut = Connector::new(client_socket)
            .connect(Connect::new("clientid"))
            .unwrap();

        // Act
        let res = run_to_completion(sut);

        // Assert
        match res.err().unwrap() {
            ConnectError::Violation => {}
            _other => panic!("expected a protocol violation"),
        }
    }

    #[test]
    fn test_handshake_malformed_connack() {
        let (client_socket, mut server_socket) = MockSocket::create();
        // CONNACK with a reserved return code
        server_socket.push_data(&[0x20, 0x02, 0x00, 0x08]);
        server_socket.push_write_ctl(Ok(8 * 1024));
        server_socket.push_read_ctl(Err(ErrorKind::WouldBlock.into()));
        server_socket.push_read_ctl(Ok(8 * 1024));
        let sut = Connector::new(client_socket)
            .connect(Connect::new("clientid"))
            .unwrap();

        let res = run_to_completion(sut);
        match res.err().unwrap() {
            ConnectError::Malformed(CodecError::BadReturnCode(8)) => {}
            _other => panic!("expected a malformed-packet error"),
        }
    }

    #[test]
    fn test_handshake_tiny_partial_reads_and_writes() {
        // Arrange
        let (client_socket, mut server_socket) = MockSocket::create();
        server_socket.push_packet(&accepted_connack());
        for _ in 1..1000 {
            server_socket.push_write_ctl(Err(ErrorKind::WouldBlock.into()));
            server_socket.push_write_ctl(Ok(1));
        }
        for _ in 1..1000 {
            server_socket.push_read_ctl(Err(ErrorKind::WouldBlock.into()));
            server_socket.push_read_ctl(Ok(1));
        }

        let sut = Connector::new(client_socket)
            .connect(Connect::new("clientid"))
            .unwrap();

        // Act
        let res = run_to_completion(sut);

        // Assert
        assert!(res.is_ok());
    }

    #[test]
    fn test_handshake_refused() {
        // Arrange
        let (client_socket, mut server_socket) = MockSocket::create();
        server_socket.push_packet(&Packet::Connack(Connack {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        }));
        server_socket.push_write_ctl(Ok(8 * 1024));
        server_socket.push_read_ctl(Err(ErrorKind::WouldBlock.into()));
        server_socket.push_read_ctl(Ok(8 * 1024));
        let sut = Connector::new(client_socket)
            .connect(Connect::new("clientid"))
            .unwrap();

        // Act
        let res = run_to_completion(sut);

        // Assert
        match res.err().unwrap() {
            ConnectError::Refused(ConnectReturnCode::NotAuthorized) => {}
            _other => panic!("expected a refused connect"),
        }
    }

    #[test]
    fn test_handshake_connection_closed() {
        // Arrange
        let (client_socket, mut server_socket) = MockSocket::create();
        server_socket.push_write_ctl(Err(ErrorKind::ConnectionAborted.into()));
        server_socket.push_read_ctl(Ok(8 * 1024));
        let sut = Connector::new(client_socket)
            .connect(Connect::new("clientid"))
            .unwrap();

        // Act
        let res = run_to_completion(sut);

        // Assert
        match res.err().unwrap() {
            ConnectError::Io(ErrorKind::ConnectionAborted) => {}
            _other => panic!("expected an aborted connection"),
        }
    }

    #[test]
    fn test_handshake_timeout_on_send() {
        // Arrange
        let (client_socket, mut server_socket) = MockSocket::create();
        for _ in 1..1000 {
            server_socket.push_write_ctl(Err(ErrorKind::WouldBlock.into()));
        }
        let sut = Connector::new(client_socket)
            .with_timeout(Duration::from_millis(200))
            .connect(Connect::new("clientid"))
            .unwrap();

        // Act
        let res = run_to_completion_with_backoffs(sut);

        // Assert
        match res.err().unwrap() {
            ConnectError::Io(ErrorKind::TimedOut) => {}
            _other => panic!("expected a timeout"),
        }
    }

    #[test]
    fn test_handshake_oversized_connect_packet() {
        // Arrange
        let (client_socket, _server_socket) = MockSocket::create();

        // Act
        let res = Connector::new(client_socket)
            .with_tx_buffer(5)
            .connect(Connect::new("clientid"));

        // Assert
        assert_eq!(res.err().unwrap().kind(), ErrorKind::InvalidInput);
    }

    fn run_to_completion(
        mut sut: Handshake<MockClientSocket>,
    ) -> Result<(Connection<MockClientSocket>, Connack), ConnectError<MockClientSocket>> {
        loop {
            match sut.complete() {
                Ok(done) => return Ok(done),
                Err(ConnectError::WouldBlock(p)) => {
                    // continue trying
                    sut = p;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_to_completion_with_backoffs(
        mut sut: Handshake<MockClientSocket>,
    ) -> Result<(Connection<MockClientSocket>, Connack), ConnectError<MockClientSocket>> {
        loop {
            match sut.complete() {
                Ok(done) => return Ok(done),
                Err(ConnectError::WouldBlock(p)) => {
                    // continue trying
                    std::thread::sleep(Duration::from_millis(50));
                    sut = p;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
