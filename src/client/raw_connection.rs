//! Raw TCP connection to one memcached server
//!
//! Blocking socket with separate buffered reader/writer halves. Connect is
//! bounded by a short timeout; every later read and write by the longer I/O
//! timeout.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use super::sasl::{self, AuthChannel};
use crate::cluster::{Credentials, ServerSpec};
use crate::utils::{ConnectionError, Opcode, PacketDecoder, PacketEncoder, ProtocolError, Response};

pub const CONN_TIMEOUT: Duration = Duration::from_millis(300);
pub const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw connection wrapper
pub struct RawConnection {
    writer: BufWriter<TcpStream>,
    decoder: PacketDecoder<BufReader<TcpStream>>,
    /// Scratch buffer for handshake frames
    encoder: PacketEncoder,
}

impl RawConnection {
    /// Create new TCP connection
    pub fn connect_tcp(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let connect_failed = |source: io::Error| ConnectionError::ConnectFailed {
            host: host.to_string(),
            port,
            source,
        };

        // Resolve hostname to socket address
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(connect_failed)?
            .next()
            .ok_or_else(|| {
                connect_failed(io::Error::new(io::ErrorKind::NotFound, "No addresses found"))
            })?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(connect_failed)?;

        // Configure socket
        stream.set_nodelay(true).map_err(connect_failed)?;
        stream
            .set_read_timeout(Some(io_timeout))
            .map_err(connect_failed)?;
        stream
            .set_write_timeout(Some(io_timeout))
            .map_err(connect_failed)?;

        let writer = BufWriter::with_capacity(16384, stream.try_clone().map_err(connect_failed)?);
        let reader = BufReader::with_capacity(16384, stream);

        Ok(Self {
            writer,
            decoder: PacketDecoder::new(reader),
            encoder: PacketEncoder::with_capacity(256),
        })
    }

    /// Send one encoded request and read its complete response
    pub fn execute(&mut self, packet: &[u8]) -> Result<Response, ProtocolError> {
        self.writer.write_all(packet)?;
        self.writer.flush()?;
        self.decoder.decode()
    }

    /// Local socket address, distinct per connection
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.writer.get_ref().local_addr()
    }
}

impl AuthChannel for RawConnection {
    fn exchange(
        &mut self,
        opcode: Opcode,
        key: &[u8],
        value: &[u8],
    ) -> Result<Response, ProtocolError> {
        self.encoder.clear();
        self.encoder.encode(opcode, key, value, b"");
        self.writer.write_all(self.encoder.as_bytes())?;
        self.writer.flush()?;
        self.decoder.decode()
    }
}

/// Connection factory for creating connections with common config
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    /// Client-wide credentials; inline server credentials take precedence
    pub credentials: Option<Credentials>,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self {
            connect_timeout: CONN_TIMEOUT,
            io_timeout: IO_TIMEOUT,
            credentials: None,
        }
    }
}

impl ConnectionFactory {
    /// Open and, if credentials apply, authenticate a connection
    pub fn create(&self, server: &ServerSpec) -> Result<RawConnection, ConnectionError> {
        let mut conn = RawConnection::connect_tcp(
            &server.host,
            server.port,
            self.connect_timeout,
            self.io_timeout,
        )?;

        match server
            .effective_credentials(self.credentials.as_ref())
            .filter(|creds| creds.is_usable())
        {
            Some(creds) => {
                let mechanism = sasl::negotiate(&mut conn, &server.host, creds)?;
                debug!("Authenticated to {} with {}", server, mechanism);
            }
            None => info!("No credentials for {}, not authenticating", server),
        }

        Ok(conn)
    }
}
