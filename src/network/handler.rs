//! Handler: one socket's I/O lifecycle
//!
//! ```text
//! Connecting ──writable──▶ Open ──peer EOF──▶ Closing ──drained──▶ Closed
//!      │                    │  └──close_when_drained──▶ Closing ──┘
//!      └──connect error──▶ Closed ◀──close() / I/O error──┘
//! ```
//!
//! Inbound bytes go to the attached collector, or to `on_read` when none is
//! attached. Bytes nobody took wait in an inbound buffer for the next
//! collector. Outgoing data is an [`InputQueue`] ticked into a
//! [`Buffered`] transport on write-readiness.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use mio::event::Source;
use mio::Interest;
use tracing::{debug, trace, warn};

use super::{Buffered, TcpTransport, Transport};
use crate::config::Config;
use crate::core::{Context, EventHandler};
use crate::error::{Error, Result};
use crate::protocol::{BytesInput, Collector, Input, InputQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    Open,
    /// No new data accepted; pending writes still drain.
    Closing,
    Closed,
}

/// Why a handler closed. Passed to `on_close`.
#[derive(Debug)]
pub enum CloseReason {
    /// `close()` or graceful `close_when_drained()`.
    Local,
    /// The peer shut its side down.
    PeerShutdown,
    Failed(Error),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(self, CloseReason::Failed(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::PeerShutdown => f.write_str("peer shut down"),
            CloseReason::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

type HookFn<T> = Box<dyn FnMut(&mut Handler<T>, &mut Context)>;
type ReadFn<T> = Box<dyn FnMut(&mut Handler<T>, &mut Context, &[u8])>;
type CollectedFn<T> = Box<dyn FnMut(&mut Handler<T>, &mut Context, Box<dyn Collector>)>;
type CloseFn = Box<dyn FnOnce(&mut Context, &CloseReason)>;

struct Callbacks<T: Transport> {
    on_connect: Option<HookFn<T>>,
    on_read: Option<ReadFn<T>>,
    on_collected: Option<CollectedFn<T>>,
    on_drained: Option<HookFn<T>>,
    on_close: Option<CloseFn>,
}

impl<T: Transport> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            on_connect: None,
            on_read: None,
            on_collected: None,
            on_drained: None,
            on_close: None,
        }
    }
}

pub struct Handler<T: Transport = TcpTransport> {
    transport: Buffered<T>,
    state: State,
    collector: Option<Box<dyn Collector>>,
    inbound: BytesMut,
    outgoing: InputQueue,
    // Pre-allocated receive buffer, reused on every read.
    read_buf: Box<[u8]>,
    peer_closed: bool,
    callbacks: Callbacks<T>,
}

impl Handler<TcpTransport> {
    /// Start a non-blocking TCP connect to `addr`.
    pub fn connect_tcp(addr: SocketAddr, config: &Config) -> Result<Self> {
        let transport = TcpTransport::for_addr(&addr)?;
        Self::connect(transport, addr, config)
    }
}

impl<T: Transport + 'static> Handler<T> {
    /// Wrap a connected transport.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &Config::default())
    }

    pub fn with_config(transport: T, config: &Config) -> Self {
        Self {
            transport: Buffered::new(transport, config.write_high_water),
            state: State::Open,
            collector: None,
            inbound: BytesMut::new(),
            outgoing: InputQueue::new(),
            // A zero-length read would look like EOF.
            read_buf: vec![0u8; config.read_chunk.max(1)].into_boxed_slice(),
            peer_closed: false,
            callbacks: Callbacks::default(),
        }
    }

    /// Issue a connect on `transport`; the handler starts in `Connecting`.
    pub fn connect(mut transport: T, addr: SocketAddr, config: &Config) -> Result<Self> {
        transport.connect(addr)?;
        let mut handler = Self::with_config(transport, config);
        handler.state = State::Connecting;
        debug!(%addr, "connecting");
        Ok(handler)
    }

    pub fn on_connect(mut self, f: impl FnMut(&mut Handler<T>, &mut Context) + 'static) -> Self {
        self.callbacks.on_connect = Some(Box::new(f));
        self
    }

    /// Raw inbound bytes, used while no collector is attached.
    pub fn on_read(
        mut self,
        f: impl FnMut(&mut Handler<T>, &mut Context, &[u8]) + 'static,
    ) -> Self {
        self.callbacks.on_read = Some(Box::new(f));
        self
    }

    /// The attached collector completed. Attach the next one from here.
    pub fn on_collected(
        mut self,
        f: impl FnMut(&mut Handler<T>, &mut Context, Box<dyn Collector>) + 'static,
    ) -> Self {
        self.callbacks.on_collected = Some(Box::new(f));
        self
    }

    /// Every queued byte has been handed to the socket.
    pub fn on_drained(mut self, f: impl FnMut(&mut Handler<T>, &mut Context) + 'static) -> Self {
        self.callbacks.on_drained = Some(Box::new(f));
        self
    }

    /// Fires exactly once, whatever the cause.
    pub fn on_close(mut self, f: impl FnOnce(&mut Context, &CloseReason) + 'static) -> Self {
        self.callbacks.on_close = Some(Box::new(f));
        self
    }

    pub fn with_collector<C: Collector + 'static>(mut self, collector: C) -> Self {
        self.collector = Some(Box::new(collector));
        self
    }

    /// Attach the collector that receives the next inbound bytes.
    ///
    /// Bytes already buffered are fed on the next readable event or
    /// [`EventHandler::resume`].
    pub fn set_collector<C: Collector + 'static>(&mut self, collector: C) {
        self.collector = Some(Box::new(collector));
    }

    pub fn set_collector_boxed(&mut self, collector: Box<dyn Collector>) {
        self.collector = Some(collector);
    }

    pub fn take_collector(&mut self) -> Option<Box<dyn Collector>> {
        self.collector.take()
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.send_bytes(Bytes::copy_from_slice(data))
    }

    pub fn send_bytes(&mut self, data: Bytes) -> Result<()> {
        self.send_input(BytesInput::new(data))
    }

    /// Queue an input; it is ticked whenever the socket is writable.
    pub fn send_input<I: Input + 'static>(&mut self, input: I) -> Result<()> {
        if matches!(self.state, State::Closing | State::Closed) {
            return Err(Error::Closed);
        }
        self.outgoing.push(input);
        Ok(())
    }

    /// Close immediately, dropping unsent data.
    pub fn close(&mut self, ctx: &mut Context) {
        self.finish(ctx, CloseReason::Local);
    }

    /// Stop accepting new data and close once queued data is written.
    pub fn close_when_drained(&mut self, ctx: &mut Context) {
        match self.state {
            State::Open => self.state = State::Closing,
            State::Connecting | State::Closing | State::Closed => return,
        }
        debug!(token = ?ctx.token(), "closing when drained");
        if !self.has_pending_writes() {
            self.finish(ctx, CloseReason::Local);
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Bytes sitting in the write buffer, not counting queued inputs.
    pub fn pending_write(&self) -> usize {
        self.transport.pending()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.transport.pending() > 0 || !self.outgoing.is_empty()
    }

    /// Bytes received but not yet taken by any consumer.
    pub fn buffered_input(&self) -> &[u8] {
        &self.inbound
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.transport.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn transport(&self) -> &T {
        self.transport.get_ref()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.transport.get_mut()
    }

    fn has_consumer(&self) -> bool {
        self.collector.is_some() || self.callbacks.on_read.is_some()
    }

    fn wants_read(&self) -> bool {
        self.state == State::Open && !self.peer_closed && self.has_consumer()
    }

    fn read_socket(&mut self, ctx: &mut Context) {
        while self.wants_read() {
            match self.transport.recv(&mut self.read_buf) {
                Ok(0) => {
                    self.peer_shutdown(ctx);
                    return;
                }
                Ok(n) => {
                    trace!(token = ?ctx.token(), bytes = n, "read");
                    self.inbound.extend_from_slice(&self.read_buf[..n]);
                    if let Err(e) = self.deliver(ctx) {
                        self.fail(ctx, e);
                        return;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.fail(ctx, e.into());
                    return;
                }
            }
        }
    }

    /// Hand buffered inbound bytes to consumers until nobody takes more.
    fn deliver(&mut self, ctx: &mut Context) -> Result<()> {
        while self.state != State::Closed {
            if let Some(mut collector) = self.collector.take() {
                let step = collector.add_data(&self.inbound)?;
                self.inbound.advance(step.consumed);
                if !step.done {
                    self.collector = Some(collector);
                    if step.consumed == 0 || self.inbound.is_empty() {
                        return Ok(());
                    }
                    continue;
                }
                trace!(token = ?ctx.token(), "collector done");
                self.fire_collected(ctx, collector);
            } else if !self.inbound.is_empty() && self.callbacks.on_read.is_some() {
                let data = self.inbound.split().freeze();
                if let Some(mut f) = self.callbacks.on_read.take() {
                    f(self, ctx, &data[..]);
                    self.callbacks.on_read = Some(f);
                }
            } else {
                return Ok(());
            }
        }
        Ok(())
    }

    fn fire_collected(&mut self, ctx: &mut Context, collector: Box<dyn Collector>) {
        if let Some(mut f) = self.callbacks.on_collected.take() {
            f(self, ctx, collector);
            self.callbacks.on_collected = Some(f);
        }
    }

    fn peer_shutdown(&mut self, ctx: &mut Context) {
        debug!(token = ?ctx.token(), "peer shut down");
        self.peer_closed = true;
        if let Some(mut collector) = self.collector.take() {
            match collector.close() {
                Ok(true) => self.fire_collected(ctx, collector),
                Ok(false) => trace!(token = ?ctx.token(), "idle collector discarded"),
                Err(e) => {
                    self.fail(ctx, e.into());
                    return;
                }
            }
        }
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closing;
        if !self.has_pending_writes() {
            self.finish(ctx, CloseReason::PeerShutdown);
        }
    }

    fn complete_connect(&mut self, ctx: &mut Context) {
        match self.transport.take_error() {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => {
                self.fail(ctx, e.into());
                return;
            }
        }
        match self.transport.peer_addr() {
            Ok(addr) => {
                debug!(token = ?ctx.token(), %addr, "connected");
                self.state = State::Open;
                if let Some(mut f) = self.callbacks.on_connect.take() {
                    f(self, ctx);
                    self.callbacks.on_connect = Some(f);
                }
            }
            // Spurious wakeup; wait for the next one.
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => {
                trace!(token = ?ctx.token(), "connect still pending");
            }
            Err(e) => self.fail(ctx, e.into()),
        }
    }

    fn drain(&mut self, ctx: &mut Context) {
        loop {
            let tick = match self.outgoing.tick(&mut self.transport) {
                Ok(tick) => tick,
                Err(e) => return self.fail(ctx, e.into()),
            };
            let buffered = self.transport.pending();
            match self.transport.flush() {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => return self.fail(ctx, e.into()),
            }
            if !tick.done {
                // A full buffer that just emptied leaves room for the queue.
                if tick.sent == 0 && buffered == 0 {
                    return;
                }
                continue;
            }
            trace!(token = ?ctx.token(), "drained");
            if let Some(mut f) = self.callbacks.on_drained.take() {
                f(self, ctx);
                self.callbacks.on_drained = Some(f);
            }
            if self.state == State::Closed || self.outgoing.is_empty() {
                break;
            }
        }
        if self.state == State::Closing {
            let reason = if self.peer_closed {
                CloseReason::PeerShutdown
            } else {
                CloseReason::Local
            };
            self.finish(ctx, reason);
        }
    }

    fn fail(&mut self, ctx: &mut Context, err: Error) {
        warn!(token = ?ctx.token(), error = %err, "handler failed");
        self.finish(ctx, CloseReason::Failed(err));
    }

    fn finish(&mut self, ctx: &mut Context, reason: CloseReason) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        self.outgoing.clear();
        self.transport.discard();
        self.collector = None;
        if let Err(e) = self.transport.close() {
            trace!(token = ?ctx.token(), error = %e, "shutdown failed");
        }
        debug!(token = ?ctx.token(), %reason, "closed");
        if let Some(f) = self.callbacks.on_close.take() {
            f(ctx, &reason);
        }
    }
}

impl<T: Transport + 'static> EventHandler for Handler<T> {
    fn handle_readable(&mut self, ctx: &mut Context) {
        self.read_socket(ctx);
    }

    fn handle_writable(&mut self, ctx: &mut Context) {
        match self.state {
            State::Connecting => {
                self.complete_connect(ctx);
                if self.state == State::Open {
                    self.drain(ctx);
                }
            }
            State::Open | State::Closing => self.drain(ctx),
            State::Closed => {}
        }
    }

    fn handle_error(&mut self, ctx: &mut Context) {
        match self.transport.take_error() {
            Ok(Some(e)) | Err(e) => self.fail(ctx, e.into()),
            Ok(None) => trace!(token = ?ctx.token(), "error event without socket error"),
        }
    }

    fn handle_hangup(&mut self, ctx: &mut Context) {
        if self.state == State::Connecting {
            self.complete_connect(ctx);
        }
    }

    fn interest(&self) -> Option<Interest> {
        let write = match self.state {
            State::Closed => return None,
            State::Connecting => true,
            State::Open | State::Closing => self.has_pending_writes(),
        };
        match (self.wants_read(), write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    fn close(&mut self, ctx: &mut Context) {
        Handler::close(self, ctx);
    }

    fn abort(&mut self, err: io::Error, ctx: &mut Context) {
        self.fail(ctx, err.into());
    }

    fn resume(&mut self, ctx: &mut Context) {
        if self.state != State::Open {
            return;
        }
        if self.collector.is_some() || !self.inbound.is_empty() {
            if let Err(e) = self.deliver(ctx) {
                self.fail(ctx, e);
            }
        }
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        self.transport.source()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::MockTransport;
    use crate::protocol::{
        BytesCollector, DelimitedCollector, Layout, Primitive, StructCollector, Value,
    };
    use mio::Token;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn ctx() -> Context {
        Context::new(Token(1))
    }

    fn closing_log(log: &Log) -> impl FnOnce(&mut Context, &CloseReason) + 'static {
        let log = log.clone();
        move |_, reason| log.borrow_mut().push(format!("close: {reason}"))
    }

    #[test]
    fn test_writes_arrive_in_order_across_partial_sends() {
        let mock = MockTransport::new();
        let mut h = Handler::with_config(mock.clone(), &Config::default().with_write_high_water(5));
        for chunk in [&b"alpha "[..], b"beta ", b"gamma ", b"delta"] {
            h.send(chunk).unwrap();
        }
        assert_eq!(h.interest(), Some(Interest::WRITABLE));

        let mut ctx = ctx();
        let mut ticks = 0;
        while h.has_pending_writes() {
            mock.set_send_budget(Some(3));
            h.handle_writable(&mut ctx);
            ticks += 1;
        }
        assert_eq!(mock.written(), b"alpha beta gamma delta");
        assert!(ticks > 5);
        assert_eq!(h.interest(), None);
    }

    #[test]
    fn test_writes_survive_ticks_where_socket_takes_nothing() {
        let mock = MockTransport::new();
        let mut h = Handler::with_config(mock.clone(), &Config::default().with_write_high_water(4));
        h.send(b"abcdefgh").unwrap();

        let mut ctx = ctx();
        mock.set_send_budget(Some(0));
        h.handle_writable(&mut ctx);
        assert!(mock.written().is_empty());
        assert!(h.has_pending_writes());

        // The buffer starts full, so the first pass only flushes.
        mock.set_send_budget(None);
        h.handle_writable(&mut ctx);
        assert_eq!(mock.written(), b"abcdefgh");
        assert!(!h.has_pending_writes());
        assert_eq!(h.interest(), None);
    }

    #[test]
    fn test_writes_in_order_with_stalled_ticks_mixed_in() {
        let mock = MockTransport::new();
        let mut h = Handler::with_config(mock.clone(), &Config::default().with_write_high_water(5));
        for chunk in [&b"alpha "[..], b"beta ", b"gamma ", b"delta"] {
            h.send(chunk).unwrap();
        }

        let mut ctx = ctx();
        // Stalled ticks alternate with ones that take a few bytes.
        for budget in [0, 3, 0, 0, 5, 0, 2, 0] {
            mock.set_send_budget(Some(budget));
            h.handle_writable(&mut ctx);
        }
        assert!(h.has_pending_writes());

        mock.set_send_budget(None);
        h.handle_writable(&mut ctx);
        assert_eq!(mock.written(), b"alpha beta gamma delta");
        assert!(!h.has_pending_writes());
    }

    #[test]
    fn test_interest_follows_consumers() {
        let mut h = Handler::new(MockTransport::new());
        assert_eq!(h.interest(), None);
        h.set_collector(BytesCollector::new());
        assert_eq!(h.interest(), Some(Interest::READABLE));
        h.send(b"x").unwrap();
        assert_eq!(
            h.interest(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );
    }

    #[test]
    fn test_leftover_bytes_go_to_next_collector() {
        let mock = MockTransport::new();
        mock.push_inbound(b"\x00\x03abcTAIL");
        let seen: Log = Rc::new(RefCell::new(Vec::new()));
        let out = seen.clone();
        let mut h = Handler::new(mock.clone())
            .with_collector(StructCollector::new(Layout::big(Primitive::U16)))
            .on_collected(move |h, _, mut c| match c.take_value() {
                Some(Value::U16(len)) => {
                    out.borrow_mut().push(format!("len {len}"));
                    h.set_collector(DelimitedCollector::new(BytesCollector::new(), len as usize));
                }
                Some(Value::Bytes(b)) => {
                    out.borrow_mut().push(String::from_utf8_lossy(&b).into_owned());
                }
                other => panic!("unexpected {other:?}"),
            });

        h.handle_readable(&mut ctx());
        assert_eq!(*seen.borrow(), vec!["len 3", "abc"]);
        // No consumer left: the tail waits, reading stops.
        assert_eq!(h.buffered_input(), b"TAIL");
        assert_eq!(h.interest(), None);

        h.set_collector(DelimitedCollector::new(BytesCollector::new(), 4));
        h.resume(&mut ctx());
        assert_eq!(seen.borrow().last().unwrap(), "TAIL");
    }

    #[test]
    fn test_zero_read_chunk_still_reads() {
        let mock = MockTransport::new();
        mock.push_inbound(b"abc");
        let config = Config {
            read_chunk: 0,
            ..Config::default()
        };
        let got = Rc::new(RefCell::new(Vec::new()));
        let sink = got.clone();
        let mut h = Handler::with_config(mock, &config)
            .on_read(move |_, _, data| sink.borrow_mut().extend_from_slice(data));
        h.handle_readable(&mut ctx());
        assert_eq!(*got.borrow(), b"abc");
        assert_eq!(h.state(), State::Open);
    }

    #[test]
    fn test_raw_read_path() {
        let mock = MockTransport::new();
        mock.push_inbound(b"one");
        mock.push_inbound(b"two");
        let got = Rc::new(RefCell::new(Vec::new()));
        let sink = got.clone();
        let mut h = Handler::new(mock).on_read(move |_, _, data| sink.borrow_mut().extend_from_slice(data));
        h.handle_readable(&mut ctx());
        assert_eq!(*got.borrow(), b"onetwo");
    }

    #[test]
    fn test_peer_shutdown_closes_once() {
        let mock = MockTransport::new();
        mock.push_inbound(b"bye");
        mock.set_eof();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut h = Handler::new(mock.clone())
            .on_read(|_, _, _| {})
            .on_close(closing_log(&log));

        let mut ctx = ctx();
        h.handle_readable(&mut ctx);
        h.handle_readable(&mut ctx);
        assert_eq!(h.state(), State::Closed);
        assert!(mock.is_closed());
        assert_eq!(*log.borrow(), vec!["close: peer shut down"]);
    }

    #[test]
    fn test_peer_shutdown_drains_pending_writes() {
        let mock = MockTransport::new();
        mock.set_eof();
        mock.set_send_budget(Some(0));
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut h = Handler::new(mock.clone())
            .on_read(|_, _, _| {})
            .on_close(closing_log(&log));
        h.send(b"last words").unwrap();

        let mut ctx = ctx();
        h.handle_readable(&mut ctx);
        assert_eq!(h.state(), State::Closing);
        assert!(matches!(h.send(b"more"), Err(Error::Closed)));
        assert_eq!(h.interest(), Some(Interest::WRITABLE));

        mock.set_send_budget(None);
        h.handle_writable(&mut ctx);
        assert_eq!(mock.written(), b"last words");
        assert_eq!(*log.borrow(), vec!["close: peer shut down"]);
    }

    #[test]
    fn test_truncated_collector_at_eof_fails() {
        let mock = MockTransport::new();
        mock.push_inbound(&[0, 0]);
        mock.set_eof();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut h = Handler::new(mock)
            .with_collector(StructCollector::new(Layout::big(Primitive::U32)))
            .on_close(closing_log(&log));
        h.handle_readable(&mut ctx());
        assert_eq!(h.state(), State::Closed);
        assert!(log.borrow()[0].starts_with("close: failed: framing error"));
    }

    #[test]
    fn test_read_error_fails() {
        let mock = MockTransport::new();
        mock.fail_reads(io::ErrorKind::ConnectionReset);
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut h = Handler::new(mock)
            .on_read(|_, _, _| {})
            .on_close(closing_log(&log));
        h.handle_readable(&mut ctx());
        assert!(log.borrow()[0].starts_with("close: failed: I/O error"));
    }

    #[test]
    fn test_connect_lifecycle() {
        let mock = MockTransport::new();
        let connected = Rc::new(RefCell::new(false));
        let flag = connected.clone();
        let addr = "127.0.0.1:9".parse().unwrap();
        let mut h = Handler::connect(mock.clone(), addr, &Config::default())
            .unwrap()
            .on_connect(move |_, _| *flag.borrow_mut() = true);
        h.send(b"queued early").unwrap();
        assert_eq!(h.state(), State::Connecting);
        assert_eq!(h.interest(), Some(Interest::WRITABLE));

        let mut ctx = ctx();
        // Spurious writable before the connect finished.
        h.handle_writable(&mut ctx);
        assert_eq!(h.state(), State::Connecting);

        mock.set_connected(true);
        h.handle_writable(&mut ctx);
        assert_eq!(h.state(), State::Open);
        assert!(*connected.borrow());
        assert_eq!(mock.written(), b"queued early");
    }

    #[test]
    fn test_connect_failure_reported() {
        let mock = MockTransport::new();
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let addr = "127.0.0.1:9".parse().unwrap();
        let mut h = Handler::connect(mock.clone(), addr, &Config::default())
            .unwrap()
            .on_close(closing_log(&log));
        mock.set_pending_error(io::ErrorKind::ConnectionRefused);
        h.handle_writable(&mut ctx());
        assert_eq!(h.state(), State::Closed);
        assert_eq!(log.borrow().len(), 1);
        assert!(log.borrow()[0].contains("I/O error"));
    }

    #[test]
    fn test_close_when_drained() {
        let mock = MockTransport::new();
        mock.set_send_budget(Some(2));
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut h = Handler::new(mock.clone()).on_close(closing_log(&log));
        h.send(b"abcd").unwrap();

        let mut ctx = ctx();
        h.close_when_drained(&mut ctx);
        assert_eq!(h.state(), State::Closing);
        h.handle_writable(&mut ctx);
        assert!(log.borrow().is_empty());
        mock.set_send_budget(None);
        h.handle_writable(&mut ctx);
        assert_eq!(mock.written(), b"abcd");
        assert_eq!(*log.borrow(), vec!["close: closed locally"]);
    }

    #[test]
    fn test_local_close_fires_once_and_rejects_sends() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut h = Handler::new(MockTransport::new()).on_close(closing_log(&log));
        let mut ctx = ctx();
        h.close(&mut ctx);
        EventHandler::close(&mut h, &mut ctx);
        assert_eq!(log.borrow().len(), 1);
        assert!(matches!(h.send(b"x"), Err(Error::Closed)));
        assert_eq!(h.interest(), None);
    }

    #[test]
    fn test_on_drained_may_queue_more() {
        let mock = MockTransport::new();
        let mut rounds = 0;
        let mut h = Handler::new(mock.clone()).on_drained(move |h, _| {
            rounds += 1;
            if rounds < 3 {
                h.send(b"+").unwrap();
            }
        });
        h.send(b"start").unwrap();
        h.handle_writable(&mut ctx());
        assert_eq!(mock.written(), b"start++");
        assert!(!h.has_pending_writes());
    }
}
