//! AcceptHandler: listening socket → new handlers
//!
//! On every readable event it accepts until `WouldBlock`, wraps each new
//! connection in an open [`Handler`], hands it to `on_accept` for
//! configuration and registers what comes back through the context. The
//! listener itself stays open until closed explicitly. A failed accept is
//! logged, not fatal, and the listener is re-armed so connections left in
//! the backlog are retried on the next tick.

use std::any::Any;
use std::io;
use std::net::SocketAddr;

use mio::event::Source;
use mio::Interest;
use tracing::{debug, trace, warn};

use super::{Handler, TcpTransport, Transport};
use crate::config::Config;
use crate::core::{Context, EventHandler};

type AcceptFn<T> = Box<dyn FnMut(Handler<T>, SocketAddr) -> Option<Handler<T>>>;

pub struct AcceptHandler<T: Transport = TcpTransport> {
    listener: T,
    config: Config,
    on_accept: Option<AcceptFn<T>>,
    accepted: u64,
    closed: bool,
}

impl AcceptHandler<TcpTransport> {
    /// Bind a reuse-address TCP listener on `addr`.
    pub fn bind(addr: SocketAddr, config: Config) -> io::Result<Self> {
        let mut listener = TcpTransport::for_addr(&addr)?;
        listener.set_reuse_address(true)?;
        listener.bind(addr)?;
        listener.listen(config.listen_backlog)?;
        debug!(addr = %listener.local_addr()?, "listening");
        Ok(Self::new(listener, config))
    }
}

impl<T: Transport + 'static> AcceptHandler<T> {
    /// Wrap a transport that is already listening.
    pub fn new(listener: T, config: Config) -> Self {
        Self {
            listener,
            config,
            on_accept: None,
            accepted: 0,
            closed: false,
        }
    }

    /// Configure each accepted handler (collector, callbacks, first send).
    ///
    /// Returning `None` rejects the connection; the socket is dropped.
    pub fn on_accept(
        mut self,
        f: impl FnMut(Handler<T>, SocketAddr) -> Option<Handler<T>> + 'static,
    ) -> Self {
        self.on_accept = Some(Box::new(f));
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    fn adopt(&mut self, transport: T, addr: SocketAddr, ctx: &mut Context) {
        let handler = Handler::with_config(transport, &self.config);
        let handler = match self.on_accept.as_mut() {
            Some(f) => f(handler, addr),
            None => Some(handler),
        };
        let Some(handler) = handler else {
            trace!(%addr, "connection rejected");
            return;
        };
        let token = ctx.register(handler);
        self.accepted += 1;
        debug!(%addr, ?token, "accepted");
    }
}

impl<T: Transport + 'static> EventHandler for AcceptHandler<T> {
    fn handle_readable(&mut self, ctx: &mut Context) {
        loop {
            match self.listener.accept() {
                Ok((transport, addr)) => self.adopt(transport, addr, ctx),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // e.g. EMFILE: no new edge arrives for the backlog on its own.
                    warn!(error = %e, "accept failed");
                    ctx.rearm();
                    break;
                }
            }
        }
    }

    fn handle_writable(&mut self, _ctx: &mut Context) {}

    fn handle_error(&mut self, ctx: &mut Context) {
        match self.listener.take_error() {
            Ok(Some(e)) | Err(e) => warn!(token = ?ctx.token(), error = %e, "listener error"),
            Ok(None) => {}
        }
    }

    fn interest(&self) -> Option<Interest> {
        (!self.closed).then_some(Interest::READABLE)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self, ctx: &mut Context) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.listener.close() {
            trace!(error = %e, "listener shutdown failed");
        }
        debug!(token = ?ctx.token(), accepted = self.accepted, "listener closed");
    }

    fn abort(&mut self, err: io::Error, ctx: &mut Context) {
        warn!(token = ?ctx.token(), error = %err, "listener aborted");
        self.close(ctx);
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        self.listener.source()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
