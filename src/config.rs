//! Runtime tuning shared by the multiplexer and its handlers.

/// Event loop configuration
///
/// Defaults are tuned for typical small-message protocols: 64KB read
/// chunks and a 64KB write high-water mark per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum readiness events fetched per poll.
    pub events_capacity: usize,
    /// Bytes requested from the socket per receive call.
    pub read_chunk: usize,
    /// Outgoing bytes buffered ahead of the socket before inputs stop being ticked.
    pub write_high_water: usize,
    /// Backlog passed to `listen`.
    pub listen_backlog: i32,
}

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024; // 64KB
pub const DEFAULT_WRITE_HIGH_WATER: usize = 64 * 1024; // 64KB
pub const DEFAULT_LISTEN_BACKLOG: i32 = 128;

impl Default for Config {
    fn default() -> Self {
        Self {
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            read_chunk: DEFAULT_READ_CHUNK,
            write_high_water: DEFAULT_WRITE_HIGH_WATER,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
        }
    }
}

impl Config {
    pub fn with_events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity.max(1);
        self
    }

    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }

    pub fn with_write_high_water(mut self, bytes: usize) -> Self {
        self.write_high_water = bytes.max(1);
        self
    }

    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }
}
