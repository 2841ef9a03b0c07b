//! SocketMap: the multiplexer and its run loop
//!
//! Owns every registered handler, keyed by token. Each tick waits on the
//! readiness source, then dispatches every fired event to its handler.
//!
//! Dispatch discipline:
//! - The handler is taken out of the table while it runs, so it can freely
//!   ask (through its [`Context`]) to register or close other handlers.
//! - After the callback its desired interest is compared with what is
//!   registered and the socket is registered / reregistered / deregistered.
//! - A closed handler is deregistered and dropped at once; later events
//!   for its token in the same tick find nothing and are dropped.

use std::collections::HashMap;
use std::time::Duration;

use mio::{Interest, Token};
use tracing::{debug, trace, warn};

use super::{notify, Context, EventHandler, MioPoller, Readiness, ReadinessSource, StopHandle};
use crate::config::Config;
use crate::error::{Error, Result};

struct Entry {
    handler: Box<dyn EventHandler>,
    /// Interest currently registered with the readiness source.
    registered: Option<Interest>,
}

impl Entry {
    fn new(handler: Box<dyn EventHandler>) -> Self {
        Self {
            handler,
            registered: None,
        }
    }
}

pub struct SocketMap<S: ReadinessSource = MioPoller> {
    source: S,
    handlers: HashMap<Token, Entry>,
    next_token: usize,
    events: Vec<Readiness>,
    stop_requested: bool,
    config: Config,
}

impl SocketMap<MioPoller> {
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let poller = MioPoller::new(config.events_capacity)?;
        Ok(Self::with_source(poller, config))
    }

    /// Handle that stops [`run`](Self::run) from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.source.stop_handle()
    }
}

impl<S: ReadinessSource> SocketMap<S> {
    pub fn with_source(source: S, config: Config) -> Self {
        Self {
            source,
            handlers: HashMap::new(),
            // Token(0) belongs to the waker.
            next_token: 1,
            events: Vec::with_capacity(config.events_capacity),
            stop_requested: false,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.handlers.contains_key(&token)
    }

    /// Add a handler and register its socket for the interest it asks for.
    ///
    /// On a registration failure the handler is dropped without being
    /// notified and the error is returned.
    pub fn register<H: EventHandler>(&mut self, handler: H) -> Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        let mut entry = Entry::new(Box::new(handler));
        if let Err(e) = self.update_interest(token, &mut entry, false) {
            warn!(?token, error = %e, "registration failed");
            return Err(e.into());
        }
        debug!(?token, interest = ?entry.registered, "handler registered");
        self.handlers.insert(token, entry);
        Ok(token)
    }

    /// Take a handler out of the map without closing it.
    pub fn unregister(&mut self, token: Token) -> Result<Box<dyn EventHandler>> {
        let mut entry = self
            .handlers
            .remove(&token)
            .ok_or(Error::UnknownToken(token))?;
        self.deregister(token, &mut entry);
        debug!(?token, "handler unregistered");
        Ok(entry.handler)
    }

    /// Close a handler from outside the loop.
    pub fn close(&mut self, token: Token) -> Result<()> {
        if self.dispatch(token, |handler, ctx| handler.close(ctx)) {
            Ok(())
        } else {
            Err(Error::UnknownToken(token))
        }
    }

    /// Typed access to a registered handler from outside the loop.
    ///
    /// Interest is re-synced afterwards, so e.g. data queued here is written
    /// on the next writable event, and input buffered while the handler had
    /// no consumer is fed to a collector attached here.
    pub fn with_handler<H, R, F>(&mut self, token: Token, f: F) -> Result<R>
    where
        H: EventHandler,
        F: FnOnce(&mut H, &mut Context) -> R,
    {
        let mut result = None;
        let found = self.dispatch(token, |handler, ctx| {
            if let Some(typed) = handler.as_any_mut().downcast_mut::<H>() {
                result = Some(f(typed, ctx));
                handler.resume(ctx);
            }
        });
        if !found {
            return Err(Error::UnknownToken(token));
        }
        result.ok_or(Error::HandlerType(token))
    }

    /// Make the next or current [`run`](Self::run) return after its tick.
    ///
    /// A request made while no loop is running is kept until one starts.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    /// One wait plus dispatch. Returns the number of events seen.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let mut events = std::mem::take(&mut self.events);
        events.clear();
        if let Err(e) = self.source.poll(&mut events, timeout) {
            self.events = events;
            return Err(e.into());
        }
        for readiness in &events {
            trace!(token = ?readiness.token, ?readiness, "event");
            let live = self.dispatch(readiness.token, |handler, ctx| {
                notify(handler, readiness, ctx)
            });
            if !live {
                trace!(token = ?readiness.token, "stale event dropped");
            }
        }
        let n = events.len();
        self.events = events;
        Ok(n)
    }

    /// Loop until stopped or no handlers remain. `timeout` bounds each wait.
    pub fn run(&mut self, timeout: Option<Duration>) -> Result<()> {
        debug!(handlers = self.handlers.len(), "event loop started");
        while !self.stop_requested && !self.handlers.is_empty() {
            self.poll_once(timeout)?;
            if self.source.take_stop() {
                self.stop_requested = true;
            }
        }
        self.stop_requested = false;
        debug!(handlers = self.handlers.len(), "event loop stopped");
        Ok(())
    }

    /// Run `f` against a handler with a fresh context, then settle it.
    /// Returns `false` if no handler owns `token`.
    fn dispatch<F>(&mut self, token: Token, f: F) -> bool
    where
        F: FnOnce(&mut dyn EventHandler, &mut Context),
    {
        let Some(mut entry) = self.handlers.remove(&token) else {
            return false;
        };
        let ctx = self.in_context(token, |ctx| f(entry.handler.as_mut(), ctx));
        self.settle(token, entry, ctx.rearm);
        self.apply(ctx);
        true
    }

    fn in_context<F: FnOnce(&mut Context)>(&mut self, token: Token, f: F) -> Context {
        let mut ctx = Context::with_next(token, self.next_token);
        f(&mut ctx);
        self.next_token = ctx.next_token();
        if ctx.stop {
            self.stop_requested = true;
        }
        ctx
    }

    /// Put a handler back after a callback, or reap it if it closed.
    fn settle(&mut self, token: Token, mut entry: Entry, rearm: bool) {
        if entry.handler.is_closed() {
            self.reap(token, entry);
            return;
        }
        match self.update_interest(token, &mut entry, rearm) {
            Ok(()) => {
                self.handlers.insert(token, entry);
            }
            Err(e) => {
                warn!(?token, error = %e, "interest update failed");
                let ctx = self.in_context(token, |ctx| entry.handler.abort(e, ctx));
                self.reap(token, entry);
                self.apply(ctx);
            }
        }
    }

    fn apply(&mut self, ctx: Context) {
        let parent = ctx.token();
        for (token, handler) in ctx.spawned {
            debug!(?token, ?parent, "handler registered");
            self.settle(token, Entry::new(handler), false);
        }
        for token in ctx.closing {
            if !self.dispatch(token, |handler, ctx| handler.close(ctx)) {
                trace!(?token, "close requested for unknown token");
            }
        }
    }

    /// `rearm` re-registers unchanged interest so pending readiness is reported again.
    fn update_interest(
        &mut self,
        token: Token,
        entry: &mut Entry,
        rearm: bool,
    ) -> std::io::Result<()> {
        let desired = entry.handler.interest();
        if desired == entry.registered && !(rearm && desired.is_some()) {
            return Ok(());
        }
        let Some(source) = entry.handler.source() else {
            warn!(?token, "handler has no pollable source");
            return Ok(());
        };
        match (entry.registered, desired) {
            (None, Some(interest)) => self.source.register(source, token, interest)?,
            (Some(_), Some(interest)) => self.source.reregister(source, token, interest)?,
            (Some(_), None) => self.source.deregister(source)?,
            (None, None) => {}
        }
        trace!(?token, from = ?entry.registered, to = ?desired, "interest updated");
        entry.registered = desired;
        Ok(())
    }

    fn deregister(&mut self, token: Token, entry: &mut Entry) {
        if entry.registered.take().is_none() {
            return;
        }
        if let Some(source) = entry.handler.source() {
            if let Err(e) = self.source.deregister(source) {
                warn!(?token, error = %e, "deregister failed");
            }
        }
    }

    fn reap(&mut self, token: Token, mut entry: Entry) {
        self.deregister(token, &mut entry);
        debug!(?token, "handler closed");
    }
}
