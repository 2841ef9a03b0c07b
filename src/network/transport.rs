//! Transport: uniform raw I/O over one socket
//!
//! A handler only talks to a [`Transport`], never to the concrete socket.
//! [`TcpTransport`] starts life as an unconnected `socket2` socket (bind,
//! reuse-address, listen, non-blocking connect) and turns into a mio stream
//! or listener once it has a role.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;

pub trait Transport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Start a non-blocking connect. Completion is signalled by writability.
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()>;

    fn listen(&mut self, backlog: i32) -> io::Result<()>;

    fn accept(&mut self) -> io::Result<(Self, SocketAddr)>
    where
        Self: Sized;

    fn set_reuse_address(&mut self, reuse: bool) -> io::Result<()>;

    /// Pending socket error (`SO_ERROR`), cleared by the call.
    fn take_error(&mut self) -> io::Result<Option<io::Error>>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Shut the socket down. It stays registrable so the map can deregister it.
    fn close(&mut self) -> io::Result<()>;

    /// The pollable socket, once it has one.
    fn source(&mut self) -> Option<&mut dyn Source>;
}

enum Inner {
    Unbound(Socket),
    Stream(TcpStream),
    Listener(TcpListener),
    Closed,
}

pub struct TcpTransport {
    inner: Inner,
    closed: bool,
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not connected")
}

fn wrong_state(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{what} needs an unconnected socket"),
    )
}

fn connect_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    e.kind() == io::ErrorKind::WouldBlock
}

impl TcpTransport {
    /// Unconnected non-blocking socket of the right family for `addr`.
    pub fn for_addr(addr: &SocketAddr) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            inner: Inner::Unbound(socket),
            closed: false,
        })
    }

    pub fn v4() -> io::Result<Self> {
        Self::for_addr(&SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    pub fn v6() -> io::Result<Self> {
        Self::for_addr(&SocketAddr::from(([0u16; 8], 0)))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            inner: Inner::Stream(stream),
            closed: false,
        }
    }

    /// Adopt a connected std stream, switching it to non-blocking mode.
    pub fn from_std(stream: std::net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(TcpStream::from_std(stream)))
    }

    pub fn from_listener(listener: std::net::TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            inner: Inner::Listener(TcpListener::from_std(listener)),
            closed: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_listener(&self) -> bool {
        matches!(self.inner, Inner::Listener(_))
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Stream(stream) => stream.write(buf),
            _ => Err(not_connected()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Stream(stream) => stream.read(buf),
            _ => Err(not_connected()),
        }
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let socket = match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Unbound(socket) => socket,
            other => {
                self.inner = other;
                return Err(wrong_state("connect"));
            }
        };
        match socket.connect(&addr.into()) {
            Ok(()) => trace!(%addr, "connected immediately"),
            Err(ref e) if connect_in_progress(e) => trace!(%addr, "connect in progress"),
            Err(e) => {
                self.inner = Inner::Unbound(socket);
                return Err(e);
            }
        }
        // Disable Nagle: frames are small and latency matters.
        socket.set_nodelay(true)?;
        let stream: std::net::TcpStream = socket.into();
        self.inner = Inner::Stream(TcpStream::from_std(stream));
        Ok(())
    }

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        match &self.inner {
            Inner::Unbound(socket) => socket.bind(&addr.into()),
            _ => Err(wrong_state("bind")),
        }
    }

    fn listen(&mut self, backlog: i32) -> io::Result<()> {
        let socket = match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Unbound(socket) => socket,
            other => {
                self.inner = other;
                return Err(wrong_state("listen"));
            }
        };
        if let Err(e) = socket.listen(backlog) {
            self.inner = Inner::Unbound(socket);
            return Err(e);
        }
        let listener: std::net::TcpListener = socket.into();
        self.inner = Inner::Listener(TcpListener::from_std(listener));
        Ok(())
    }

    fn accept(&mut self) -> io::Result<(Self, SocketAddr)> {
        match &mut self.inner {
            Inner::Listener(listener) => {
                let (stream, addr) = listener.accept()?;
                stream.set_nodelay(true)?;
                Ok((Self::from_stream(stream), addr))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "accept needs a listening socket",
            )),
        }
    }

    fn set_reuse_address(&mut self, reuse: bool) -> io::Result<()> {
        match &self.inner {
            Inner::Unbound(socket) => socket.set_reuse_address(reuse),
            _ => Err(wrong_state("set_reuse_address")),
        }
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        match &self.inner {
            Inner::Unbound(socket) => socket.take_error(),
            Inner::Stream(stream) => stream.take_error(),
            Inner::Listener(listener) => listener.take_error(),
            Inner::Closed => Ok(None),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.inner {
            Inner::Stream(stream) => stream.peer_addr(),
            _ => Err(not_connected()),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.inner {
            Inner::Stream(stream) => stream.local_addr(),
            Inner::Listener(listener) => listener.local_addr(),
            Inner::Unbound(socket) => socket
                .local_addr()?
                .as_socket()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket")),
            Inner::Closed => Err(not_connected()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &self.inner {
            Inner::Stream(stream) => match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
                _ => Ok(()),
            },
            Inner::Unbound(_) => {
                self.inner = Inner::Closed;
                Ok(())
            }
            // Listener and Closed: dropped with the transport.
            _ => Ok(()),
        }
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        match &mut self.inner {
            Inner::Stream(stream) => Some(stream),
            Inner::Listener(listener) => Some(listener),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_listen_local_addr() {
        let mut t = TcpTransport::v4().unwrap();
        t.set_reuse_address(true).unwrap();
        t.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        t.listen(16).unwrap();
        assert!(t.is_listener());
        let addr = t.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(t.source().is_some());
        // Role is fixed once listening.
        assert!(t.bind(addr).is_err());
        assert!(t.connect(addr).is_err());
    }

    #[test]
    fn test_accept_would_block_when_idle() {
        let mut t = TcpTransport::v4().unwrap();
        t.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        t.listen(16).unwrap();
        let err = t.accept().err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_unconnected_send_fails() {
        let mut t = TcpTransport::v4().unwrap();
        assert_eq!(t.send(b"x").unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert!(t.source().is_none());
        t.close().unwrap();
        assert!(t.is_closed());
    }
}
