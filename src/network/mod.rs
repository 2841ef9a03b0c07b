//! Network Layer: sockets driven by the event loop
//!
//! - [`Transport`]: raw non-blocking I/O over one socket ([`TcpTransport`])
//! - [`Buffered`]: write buffering on top of any transport
//! - [`Handler`]: per-connection lifecycle, collectors in, inputs out
//! - [`AcceptHandler`]: listener that spawns a [`Handler`] per connection
//!
//! None of these block. Each one is an [`EventHandler`](crate::core::EventHandler)
//! or feeds one, and is registered in a [`SocketMap`](crate::core::SocketMap).

mod acceptor;
mod buffered;
mod handler;
#[cfg(test)]
mod mock;
mod transport;

pub use acceptor::AcceptHandler;
pub use buffered::Buffered;
pub use handler::{CloseReason, Handler, State};
pub use transport::{TcpTransport, Transport};
