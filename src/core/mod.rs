//! Core module: single-threaded readiness multiplexer
//!
//! Design principles:
//! - One thread, cooperative: the wait on the readiness source is the only
//!   place the loop blocks
//! - Edge triggered: handlers read, write and accept until `WouldBlock`
//! - Deferred mutation: handlers change the map through a [`Context`],
//!   applied after their callback returns

mod notifier;
mod poller;
mod socket_map;

pub use notifier::{notify, Context, EventHandler};
pub use poller::{MioPoller, Readiness, ReadinessSource, StopHandle, WAKER_TOKEN};
pub use socket_map::SocketMap;

// Types that appear in handler signatures.
pub use mio::{Interest, Token};
