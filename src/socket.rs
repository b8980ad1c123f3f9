// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The byte-level socket seam. The transport engine owns a [`Socket`] and
//! drives it from a single thread; timeout policy belongs to the adapter,
//! not to the engine.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A blocking byte transport under a session.
///
/// The engine calls `read` from its single suspension point and interprets
/// the result: bytes are fed to the current data consumer (banner reader,
/// then packet dispatcher), `Ok(0)` is a peer hang-up and any error is a
/// socket exception. Implementations must be usable from one thread at a
/// time only.
pub trait Socket: Send {
    /// Establish the connection. Called once, unless the implementation
    /// was constructed around an already-open stream.
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        bind_addr: Option<&str>,
    ) -> Result<(), std::io::Error>;

    /// Blocking read; `Ok(0)` means the peer closed the connection.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error>;

    /// Queue outgoing bytes; the engine follows up with `flush`.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), std::io::Error>;

    /// Block until all queued bytes have been handed to the OS.
    fn flush(&mut self) -> Result<(), std::io::Error>;

    /// Close the connection. Must be idempotent.
    fn close(&mut self);

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;
}

/// The default adapter: a blocking `std::net::TcpStream`.
pub struct TcpSocket {
    stream: Option<TcpStream>,
    read_timeout: Option<Duration>,
}

impl TcpSocket {
    /// A socket that will connect when the session asks it to.
    pub fn new() -> Self {
        TcpSocket {
            stream: None,
            read_timeout: None,
        }
    }

    /// Adopt an already-connected stream instead of dialing.
    pub fn from_stream(stream: TcpStream) -> Self {
        TcpSocket {
            stream: Some(stream),
            read_timeout: None,
        }
    }

    /// Blocking reads will fail after `timeout`; `None` blocks forever.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    fn stream(&mut self) -> Result<&mut TcpStream, std::io::Error> {
        self.stream
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "socket not open"))
    }
}

impl Default for TcpSocket {
    fn default() -> Self {
        TcpSocket::new()
    }
}

impl Socket for TcpSocket {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        bind_addr: Option<&str>,
    ) -> Result<(), std::io::Error> {
        if bind_addr.is_some() {
            // Binding the source address needs a raw socket builder;
            // callers who need it plug in their own adapter.
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "bind_addr is not supported by the default TCP adapter",
            ));
        }
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "could not resolve host")
            })?;
        debug!("Connecting to {}", addr);
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(self.read_timeout)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        self.stream()?.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), std::io::Error> {
        self.stream()?.write_all(buf)
    }

    fn flush(&mut self) -> Result<(), std::io::Error> {
        self.stream()?.flush()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
