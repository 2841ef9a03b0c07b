//! Notifier: readiness → handler callbacks
//!
//! A handler never touches the [`SocketMap`](super::SocketMap) directly.
//! While it runs, the map has taken it out of its table and hands it a
//! [`Context`]; registrations, closes and stop requests are recorded there
//! and applied once the callback returns.

use std::any::Any;
use std::io;

use mio::event::Source;
use mio::{Interest, Token};

use super::Readiness;

/// Lifecycle hooks the multiplexer drives.
pub trait EventHandler: Any {
    fn handle_readable(&mut self, ctx: &mut Context);

    fn handle_writable(&mut self, ctx: &mut Context);

    /// The readiness source flagged an error on the socket.
    fn handle_error(&mut self, ctx: &mut Context);

    fn handle_hangup(&mut self, _ctx: &mut Context) {}

    /// Interest to register for, or `None` to stay deregistered.
    fn interest(&self) -> Option<Interest>;

    fn is_closed(&self) -> bool;

    fn close(&mut self, ctx: &mut Context);

    /// Close after a failure outside the handler's own I/O, e.g. registration.
    fn abort(&mut self, err: io::Error, ctx: &mut Context);

    /// Called after out-of-loop access so buffered work can proceed.
    fn resume(&mut self, _ctx: &mut Context) {}

    fn source(&mut self) -> Option<&mut dyn Source>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Deferred requests made by a handler during one callback.
pub struct Context {
    token: Token,
    next_token: usize,
    pub(crate) spawned: Vec<(Token, Box<dyn EventHandler>)>,
    pub(crate) closing: Vec<Token>,
    pub(crate) stop: bool,
    pub(crate) rearm: bool,
}

impl Context {
    /// A context outside any map. New tokens are allocated after `token`.
    pub fn new(token: Token) -> Self {
        Self::with_next(token, token.0 + 1)
    }

    pub(crate) fn with_next(token: Token, next_token: usize) -> Self {
        Self {
            token,
            next_token,
            spawned: Vec::new(),
            closing: Vec::new(),
            stop: false,
            rearm: false,
        }
    }

    /// Token of the handler being dispatched.
    pub fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn next_token(&self) -> usize {
        self.next_token
    }

    /// Register `handler` once the current callback returns.
    pub fn register<H: EventHandler>(&mut self, handler: H) -> Token {
        self.register_boxed(Box::new(handler))
    }

    pub fn register_boxed(&mut self, handler: Box<dyn EventHandler>) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.spawned.push((token, handler));
        token
    }

    /// Close another handler once the current callback returns.
    ///
    /// Pending events for it in the current tick are dropped.
    pub fn close(&mut self, token: Token) {
        self.closing.push(token);
    }

    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Re-register the current handler's interest after this callback.
    ///
    /// Edge-triggered sources report readiness that is still pending again,
    /// e.g. a listener that left connections in its backlog.
    pub fn rearm(&mut self) {
        self.rearm = true;
    }

    /// Handlers registered through this context, in order.
    pub fn spawned(&self) -> impl Iterator<Item = Token> + '_ {
        self.spawned.iter().map(|(token, _)| *token)
    }
}

/// Map one readiness event to handler callbacks.
///
/// Read and write fire independently in the same tick. A handler that closes
/// part way receives nothing further.
pub fn notify(handler: &mut dyn EventHandler, readiness: &Readiness, ctx: &mut Context) {
    if readiness.error {
        handler.handle_error(ctx);
    }
    if readiness.readable && !handler.is_closed() {
        handler.handle_readable(ctx);
    }
    if readiness.writable && !handler.is_closed() {
        handler.handle_writable(ctx);
    }
    if readiness.hangup && !handler.is_closed() {
        handler.handle_hangup(ctx);
    }
}
