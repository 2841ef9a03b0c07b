//! Protocol layer: streaming codecs and the packet language
//!
//! Design principles:
//! - Streaming: collectors take whatever bytes are available and hand back
//!   what they did not use; inputs push until the sink is saturated
//! - Composable: queues of collectors/inputs are collectors/inputs themselves
//! - Compile once: a packet [`Expr`] is checked and flattened into an
//!   immutable [`Packet`] shared by every connection

mod collector;
mod collector_queue;
mod dsl;
mod input;
mod input_queue;
mod layout;
mod packet;
mod value;

pub use collector::{
    feed, BytesCollector, Collector, CollectorExt, DelimitedCollector, FileCollector,
    LineCollector, OnClose, Step, StructCollector,
};
pub use collector_queue::{CollectorHandle, CollectorQueue, FactoryCollector};
pub use dsl::{sequence, Expr, FieldRef};
pub use input::{
    BytesInput, FileInput, Input, InputExt, MmapInput, OnDone, Sink, Tick, DEFAULT_FILE_BUFFER,
};
pub use input_queue::{FactoryInput, InputHandle, InputQueue};
pub use layout::{Endian, Layout, Primitive};
pub use packet::{Packet, PacketCollector};
pub use value::{NamedValues, PacketValues, Value};
