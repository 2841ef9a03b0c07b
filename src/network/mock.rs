//! Scripted transport for handler tests
//!
//! Clones share state, so a test keeps one copy to feed inbound chunks and
//! inspect what was written while the handler owns the other.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use mio::event::Source;

use super::Transport;

#[derive(Default)]
struct State {
    inbound: VecDeque<Vec<u8>>,
    eof: bool,
    read_error: Option<io::ErrorKind>,
    accept_error: Option<io::ErrorKind>,
    written: Vec<u8>,
    /// Bytes accepted before `WouldBlock`; `None` is unlimited.
    send_budget: Option<usize>,
    write_zero: bool,
    connected: bool,
    pending_error: Option<io::ErrorKind>,
    closed: bool,
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport(Rc<RefCell<State>>);

impl MockTransport {
    /// Already connected.
    pub(crate) fn new() -> Self {
        let mock = Self::default();
        mock.0.borrow_mut().connected = true;
        mock
    }

    pub(crate) fn push_inbound(&self, data: &[u8]) {
        self.0.borrow_mut().inbound.push_back(data.to_vec());
    }

    pub(crate) fn set_eof(&self) {
        self.0.borrow_mut().eof = true;
    }

    pub(crate) fn fail_reads(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().read_error = Some(kind);
    }

    /// The next accept fails with `kind`; later ones would block.
    pub(crate) fn fail_accept(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().accept_error = Some(kind);
    }

    pub(crate) fn set_send_budget(&self, budget: Option<usize>) {
        self.0.borrow_mut().send_budget = budget;
    }

    pub(crate) fn set_write_zero(&self, on: bool) {
        self.0.borrow_mut().write_zero = on;
    }

    pub(crate) fn set_connected(&self, on: bool) {
        self.0.borrow_mut().connected = on;
    }

    pub(crate) fn set_pending_error(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().pending_error = Some(kind);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.0.borrow().written.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }
}

impl Transport for MockTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        if state.write_zero {
            return Ok(0);
        }
        let n = match state.send_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        if let Some(budget) = state.send_budget.as_mut() {
            *budget -= n;
        }
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        if let Some(kind) = state.read_error.take() {
            return Err(kind.into());
        }
        match state.inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if state.eof => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn connect(&mut self, _addr: SocketAddr) -> io::Result<()> {
        self.0.borrow_mut().connected = false;
        Ok(())
    }

    fn bind(&mut self, _addr: SocketAddr) -> io::Result<()> {
        Ok(())
    }

    fn listen(&mut self, _backlog: i32) -> io::Result<()> {
        Ok(())
    }

    fn accept(&mut self) -> io::Result<(Self, SocketAddr)> {
        let kind = self.0.borrow_mut().accept_error.take();
        Err(kind.unwrap_or(io::ErrorKind::WouldBlock).into())
    }

    fn set_reuse_address(&mut self, _reuse: bool) -> io::Result<()> {
        Ok(())
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        Ok(self.0.borrow_mut().pending_error.take().map(io::Error::from))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        if self.0.borrow().connected {
            Ok(SocketAddr::from(([127, 0, 0, 1], 9)))
        } else {
            Err(io::ErrorKind::NotConnected.into())
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.borrow_mut().closed = true;
        Ok(())
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        None
    }
}
