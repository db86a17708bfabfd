//! Connections to USB/IP hosts

use crate::error::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::AsFd;
use std::time::Duration;
use tracing::debug;

/// A connected byte stream to a host
///
/// The descriptor is needed so the stream can be handed to the kernel once the
/// device is attached.
pub trait Link: Read + Write + AsFd + Send + 'static {}

impl<T: Read + Write + AsFd + Send + 'static> Link for T {}

/// Opens links to hosts
pub trait Connector: Send + Sync {
    type Link: Link;

    /// Connect to `host`; every failure is [`Error::NetworkUnreachable`]
    fn connect(&self, host: &str) -> Result<Self::Link>;
}

/// TCP connector for the standard USB/IP port
#[derive(Debug, Clone)]
pub struct TcpConnector {
    port: u16,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn try_connect(&self, host: &str) -> io::Result<TcpStream> {
        let mut last_err = None;

        for addr in (host, self.port).to_socket_addrs()? {
            debug!("Connecting to {}", addr);
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Connection to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        }))
    }
}

impl Connector for TcpConnector {
    type Link = TcpStream;

    fn connect(&self, host: &str) -> Result<TcpStream> {
        let unreachable = |source| Error::NetworkUnreachable {
            host: host.to_string(),
            source,
        };

        let stream = self.try_connect(host).map_err(unreachable)?;
        stream.set_nodelay(true).map_err(unreachable)?;
        stream
            .set_read_timeout(self.io_timeout)
            .map_err(unreachable)?;
        stream
            .set_write_timeout(self.io_timeout)
            .map_err(unreachable)?;

        debug!("Connected to {}:{}", host, self.port);
        Ok(stream)
    }
}
