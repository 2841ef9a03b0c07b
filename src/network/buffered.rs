//! Buffered writes over any transport
//!
//! [`Buffered`] is a decorator: it is a [`Transport`] itself, but `send`
//! only appends to an outgoing buffer. [`Buffered::flush`] pushes the buffer
//! to the inner transport on write-readiness and keeps what the socket did
//! not take, so no write ever blocks and no byte is reordered or lost.

use std::io;
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use mio::event::Source;
use tracing::trace;

use super::Transport;
use crate::protocol::Sink;

pub struct Buffered<T> {
    inner: T,
    out: BytesMut,
    high_water: usize,
}

impl<T: Transport> Buffered<T> {
    pub fn new(inner: T, high_water: usize) -> Self {
        Self {
            inner,
            out: BytesMut::with_capacity(high_water),
            high_water: high_water.max(1),
        }
    }

    /// Append to the outgoing buffer regardless of the high-water mark.
    #[inline]
    pub fn buffered_write(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    /// Write buffered bytes until the buffer is empty or the socket would block.
    ///
    /// Returns `true` once everything has been handed to the socket.
    pub fn flush(&mut self) -> io::Result<bool> {
        while !self.out.is_empty() {
            match self.inner.send(&self.out) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    ))
                }
                Ok(n) => {
                    trace!(sent = n, left = self.out.len() - n, "flush");
                    self.out.advance(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Bytes waiting in the buffer.
    #[inline(always)]
    pub fn pending(&self) -> usize {
        self.out.len()
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwrap, discarding anything not yet flushed.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Drop unflushed bytes.
    pub fn discard(&mut self) {
        self.out.clear();
    }
}

/// Inputs tick into the buffer; it stops accepting at the high-water mark.
impl<T: Transport> Sink for Buffered<T> {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.high_water.saturating_sub(self.out.len());
        let n = room.min(buf.len());
        self.out.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

impl<T: Transport> Transport for Buffered<T> {
    /// Never blocks: everything is buffered.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffered_write(buf);
        Ok(buf.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf)
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.inner.connect(addr)
    }

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.inner.bind(addr)
    }

    fn listen(&mut self, backlog: i32) -> io::Result<()> {
        self.inner.listen(backlog)
    }

    fn accept(&mut self) -> io::Result<(Self, SocketAddr)> {
        let (inner, addr) = self.inner.accept()?;
        Ok((Buffered::new(inner, self.high_water), addr))
    }

    fn set_reuse_address(&mut self, reuse: bool) -> io::Result<()> {
        self.inner.set_reuse_address(reuse)
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        self.inner.take_error()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        self.inner.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::MockTransport;

    #[test]
    fn test_flush_keeps_unsent_remainder() {
        let mock = MockTransport::new();
        mock.set_send_budget(Some(4));
        let mut t = Buffered::new(mock.clone(), 64);
        Transport::send(&mut t, b"hello ").unwrap();
        Transport::send(&mut t, b"world").unwrap();

        assert!(!t.flush().unwrap());
        assert_eq!(t.pending(), 7);
        mock.set_send_budget(Some(4));
        assert!(!t.flush().unwrap());
        mock.set_send_budget(None);
        assert!(t.flush().unwrap());
        assert_eq!(mock.written(), b"hello world");
    }

    #[test]
    fn test_sink_bounded_by_high_water() {
        let mut t = Buffered::new(MockTransport::new(), 8);
        assert_eq!(Sink::send(&mut t, b"0123456789").unwrap(), 8);
        assert_eq!(Sink::send(&mut t, b"x").unwrap(), 0);
        // Raw transport sends ignore the mark.
        assert_eq!(Transport::send(&mut t, b"xyz").unwrap(), 3);
        assert_eq!(t.pending(), 11);
    }

    #[test]
    fn test_write_zero_is_error() {
        let mock = MockTransport::new();
        mock.set_write_zero(true);
        let mut t = Buffered::new(mock, 8);
        t.buffered_write(b"a");
        assert_eq!(t.flush().unwrap_err().kind(), io::ErrorKind::WriteZero);
    }
}
