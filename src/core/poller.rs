//! Readiness source
//!
//! [`ReadinessSource`] is the seam between the multiplexer and the OS.
//! [`MioPoller`] is the real backend (epoll / kqueue / IOCP, whichever mio
//! was built for); tests plug in a scripted source.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::trace;

/// Reserved for the waker; handler tokens start at 1.
pub const WAKER_TOKEN: Token = Token(0);

/// One fired event, detached from mio's borrowed `Event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    /// Peer closed, or both halves shut down.
    pub hangup: bool,
}

impl Readiness {
    pub fn readable(token: Token) -> Self {
        Self {
            token,
            readable: true,
            writable: false,
            error: false,
            hangup: false,
        }
    }

    pub fn writable(token: Token) -> Self {
        Self {
            readable: false,
            writable: true,
            ..Self::readable(token)
        }
    }

    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            hangup: event.is_read_closed() && event.is_write_closed(),
        }
    }
}

pub trait ReadinessSource {
    fn register(&mut self, source: &mut dyn Source, token: Token, interest: Interest)
        -> io::Result<()>;

    fn reregister(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>;

    fn deregister(&mut self, source: &mut dyn Source) -> io::Result<()>;

    /// Wait up to `timeout` (forever when `None`) and append fired events to `out`.
    fn poll(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;

    /// Consume a stop request made from another thread.
    fn take_stop(&mut self) -> bool {
        false
    }
}

pub struct MioPoller {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    stopped: Arc<AtomicBool>,
}

impl MioPoller {
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity.max(1)),
            waker: Arc::new(waker),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stopped.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl ReadinessSource for MioPoller {
    fn register(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    fn reregister(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    fn deregister(&mut self, source: &mut dyn Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    fn poll(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            // A signal cut the wait short: report an empty tick.
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                trace!("poller woken");
                continue;
            }
            out.push(Readiness::from_event(event));
        }
        Ok(())
    }

    fn take_stop(&mut self) -> bool {
        self.stopped.swap(false, Ordering::AcqRel)
    }
}

/// Stops a running [`SocketMap`](super::SocketMap) from any thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) -> io::Result<()> {
        self.flag.store(true, Ordering::Release);
        self.waker.wake()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_poll_timeout_empty() {
        let mut poller = MioPoller::new(16).unwrap();
        let mut out = Vec::new();
        let start = Instant::now();
        poller.poll(&mut out, Some(Duration::from_millis(20))).unwrap();
        assert!(out.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_waker_filtered_and_stop_flag_set() {
        let mut poller = MioPoller::new(16).unwrap();
        let handle = poller.stop_handle();
        std::thread::spawn(move || handle.stop().unwrap())
            .join()
            .unwrap();
        let mut out = Vec::new();
        poller.poll(&mut out, Some(Duration::from_secs(1))).unwrap();
        assert!(out.is_empty());
        assert!(poller.take_stop());
        assert!(!poller.take_stop());
    }

    #[test]
    fn test_stop_handle_is_send() {
        fn assert_send<T: Send + Sync + Clone>() {}
        assert_send::<StopHandle>();
    }
}
