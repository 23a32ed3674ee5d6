//! The Tether-Streams Crate
//!
//! Concrete transports for the engine: plain TCP, and TLS over TCP behind
//! the `use-native-tls` feature. Streams are handed out in nonblocking
//! mode, as the engine expects.

use std::net::TcpStream;

use log::debug;
use tether_engine::transport::Transport;

/// Opens plain TCP connections to a fixed broker address
pub struct TcpTransport {
    host: String,
    port: u16,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16) -> TcpTransport {
        TcpTransport {
            host: host.to_owned(),
            port,
        }
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn open(&mut self) -> std::io::Result<TcpStream> {
        debug!("Opening TCP connection to {}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }
}

#[cfg(feature = "use-native-tls")]
mod tls {
    use super::Transport;
    use log::debug;
    use native_tls::{HandshakeError, TlsConnector, TlsStream};
    use std::io::ErrorKind;
    use std::net::TcpStream;

    /// Opens TLS connections to a fixed broker address. The TLS handshake
    /// runs on a blocking socket; the stream switches to nonblocking once
    /// the channel is up.
    pub struct TlsTransport {
        host: String,
        port: u16,
        connector: TlsConnector,
    }

    impl TlsTransport {
        /// # Errors
        /// Any TLS backend initialization failure
        pub fn new(host: &str, port: u16) -> Result<TlsTransport, native_tls::Error> {
            Ok(TlsTransport {
                host: host.to_owned(),
                port,
                connector: TlsConnector::new()?,
            })
        }
    }

    impl Transport for TlsTransport {
        type Stream = TlsStream<TcpStream>;

        fn open(&mut self) -> std::io::Result<TlsStream<TcpStream>> {
            debug!("Opening TLS connection to {}:{}", self.host, self.port);
            let tcp = TcpStream::connect((self.host.as_str(), self.port))?;
            tcp.set_nodelay(true)?;

            let mut pending = self.connector.connect(&self.host, tcp);
            loop {
                match pending {
                    Ok(stream) => {
                        stream.get_ref().set_nonblocking(true)?;
                        return Ok(stream);
                    }
                    Err(HandshakeError::WouldBlock(mid)) => {
                        pending = mid.handshake();
                    }
                    Err(HandshakeError::Failure(e)) => {
                        return Err(std::io::Error::new(ErrorKind::InvalidData, e));
                    }
                }
            }
        }
    }
}

#[cfg(feature = "use-native-tls")]
pub use tls::TlsTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ErrorKind, Read};
    use std::net::TcpListener;

    #[test]
    fn test_tcp_transport_opens_nonblocking_streams() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut sut = TcpTransport::new("127.0.0.1", port);

        let mut stream = sut.open().unwrap();

        let mut buf = [0u8; 8];
        let res = stream.read(&mut buf);
        assert_eq!(res.unwrap_err().kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_tcp_transport_reports_connect_failures() {
        // a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut sut = TcpTransport::new("127.0.0.1", port);

        assert!(sut.open().is_err());
    }
}
