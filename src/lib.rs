//! sockframe - readiness-driven sockets with composable packet codecs
//!
//! Architecture:
//! - `core`: single-threaded multiplexer over mio, handlers dispatched by token
//! - `network`: transports, buffered writes, connection and accept handlers
//! - `protocol`: streaming collectors (parse) and inputs (produce), plus a
//!   small packet language compiled into both
//!
//! An echo server:
//!
//! ```no_run
//! use sockframe::{AcceptHandler, Config, SocketMap};
//!
//! let mut map = SocketMap::new()?;
//! let addr = "127.0.0.1:9000".parse().unwrap();
//! let server = AcceptHandler::bind(addr, Config::default())?.on_accept(|conn, _peer| {
//!     Some(conn.on_read(|conn, _ctx, data| {
//!         let _ = conn.send(data);
//!     }))
//! });
//! map.register(server)?;
//! map.run(None)?;
//! # Ok::<(), sockframe::Error>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;
pub mod util;

pub use crate::config::Config;
pub use crate::core::{Context, EventHandler, MioPoller, SocketMap, StopHandle};
pub use crate::error::{CodecError, Error, ExprError, Result};
pub use crate::network::{AcceptHandler, CloseReason, Handler, State, TcpTransport, Transport};
pub use crate::protocol::{Collector, Expr, Input, Packet, PacketValues, Value};
