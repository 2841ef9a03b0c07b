//! Collectors: finite byte-consuming tasks
//!
//! A collector is fed whatever bytes are available and reports how many it
//! took. Bytes it did not take stay with the caller, nothing is discarded.
//!
//! ```text
//! inbound bytes ──▶ add_data(&[u8]) ──▶ Step { consumed, done }
//!                        │
//!                        └─ done ──▶ on_close callback (exactly once)
//! ```

use std::io::Write;

use bytes::{Bytes, BytesMut};

use super::{Layout, Value};
use crate::error::CodecError;

/// Outcome of one [`Collector::add_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub consumed: usize,
    pub done: bool,
}

impl Step {
    #[inline(always)]
    pub const fn more(consumed: usize) -> Self {
        Self {
            consumed,
            done: false,
        }
    }

    #[inline(always)]
    pub const fn done(consumed: usize) -> Self {
        Self {
            consumed,
            done: true,
        }
    }
}

/// Streaming consumer with a completion criterion.
pub trait Collector {
    /// Consume a prefix of `data`.
    ///
    /// Once `done` has been reported the collector takes no more bytes.
    /// Calling with an empty slice is allowed and lets zero-length
    /// collectors complete.
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError>;

    /// External end-of-stream signal, e.g. the peer closed the connection.
    ///
    /// `Ok(true)` means the collector holds a complete value, `Ok(false)` that
    /// nothing was in progress. A partially collected value is an error.
    fn close(&mut self) -> Result<bool, CodecError>;

    fn is_done(&self) -> bool;

    /// Move the collected value out, if this collector produces one.
    ///
    /// A second call returns `None`; the collector stays done.
    fn take_value(&mut self) -> Option<Value> {
        None
    }
}

impl<C: Collector + ?Sized> Collector for Box<C> {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        (**self).add_data(data)
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        (**self).close()
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }

    fn take_value(&mut self) -> Option<Value> {
        (**self).take_value()
    }
}

/// Decodes one fixed-size primitive.
#[derive(Debug)]
pub struct StructCollector {
    layout: Layout,
    buf: [u8; 8],
    filled: usize,
    value: Option<Value>,
    done: bool,
}

impl StructCollector {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            buf: [0u8; 8],
            filled: 0,
            value: None,
            done: false,
        }
    }

    /// The decoded value, until it is taken.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

impl Collector for StructCollector {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.done {
            return Ok(Step::done(0));
        }
        let size = self.layout.size();
        let n = (size - self.filled).min(data.len());
        self.buf[self.filled..self.filled + n].copy_from_slice(&data[..n]);
        self.filled += n;

        if self.filled == size {
            self.value = Some(self.layout.decode(&self.buf[..size]));
            self.done = true;
            Ok(Step::done(n))
        } else {
            Ok(Step::more(n))
        }
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        match self.filled {
            0 => Ok(false),
            n if n == self.layout.size() => Ok(true),
            n => Err(CodecError::Truncated {
                received: n,
                expected: self.layout.size(),
            }),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }
}

/// Accumulates every byte until closed.
#[derive(Debug, Default)]
pub struct BytesCollector {
    buf: BytesMut,
    closed: bool,
}

impl BytesCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Collector for BytesCollector {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.closed {
            return Ok(Step::done(0));
        }
        self.buf.extend_from_slice(data);
        Ok(Step::more(data.len()))
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        self.closed = true;
        Ok(true)
    }

    fn is_done(&self) -> bool {
        self.closed
    }

    fn take_value(&mut self) -> Option<Value> {
        Some(Value::Bytes(self.buf.split().freeze()))
    }
}

/// Forwards at most `limit` bytes to an inner collector.
///
/// Completes when the inner collector completes or the limit is reached,
/// whichever comes first. An inner collector that is still incomplete at the
/// limit is a framing violation.
#[derive(Debug)]
pub struct DelimitedCollector<C> {
    inner: C,
    limit: usize,
    remaining: usize,
    done: bool,
}

impl<C: Collector> DelimitedCollector<C> {
    pub fn new(inner: C, limit: usize) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
            done: false,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Bytes still accepted before the limit.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn finish_at_limit(&mut self) -> Result<(), CodecError> {
        match self.inner.close() {
            Ok(_) if self.inner.is_done() => {
                self.done = true;
                Ok(())
            }
            Ok(_) | Err(_) => Err(CodecError::LimitExceeded { limit: self.limit }),
        }
    }
}

impl<C: Collector> Collector for DelimitedCollector<C> {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.done {
            return Ok(Step::done(0));
        }
        let take = self.remaining.min(data.len());
        let step = self.inner.add_data(&data[..take])?;
        self.remaining -= step.consumed;

        if step.done {
            self.done = true;
        } else if self.remaining == 0 {
            self.finish_at_limit()?;
        }
        Ok(Step {
            consumed: step.consumed,
            done: self.done,
        })
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        if self.done {
            return Ok(true);
        }
        if self.limit == 0 {
            self.finish_at_limit()?;
            return Ok(true);
        }
        if self.remaining == self.limit {
            return Ok(false);
        }
        Err(CodecError::Truncated {
            received: self.limit - self.remaining,
            expected: self.limit,
        })
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn take_value(&mut self) -> Option<Value> {
        self.inner.take_value()
    }
}

/// Writes every consumed byte to an external sink until closed.
///
/// With `owns_sink == false` the sink is kept after close so the caller can
/// take it back with [`FileCollector::into_sink`].
pub struct FileCollector<W: Write> {
    sink: Option<W>,
    owns_sink: bool,
    written: u64,
    closed: bool,
}

impl<W: Write> FileCollector<W> {
    pub fn new(sink: W, owns_sink: bool) -> Self {
        Self {
            sink: Some(sink),
            owns_sink,
            written: 0,
            closed: false,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns the sink unless it was released on close.
    pub fn into_sink(self) -> Option<W> {
        self.sink
    }
}

impl<W: Write> Collector for FileCollector<W> {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.closed {
            return Ok(Step::done(0));
        }
        let sink = self.sink.as_mut().ok_or(CodecError::AlreadyClosed)?;
        sink.write_all(data).map_err(CodecError::Sink)?;
        self.written += data.len() as u64;
        Ok(Step::more(data.len()))
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        if self.closed {
            return Ok(true);
        }
        self.closed = true;
        if let Some(sink) = self.sink.as_mut() {
            sink.flush().map_err(CodecError::Sink)?;
        }
        if self.owns_sink {
            self.sink = None;
        }
        Ok(true)
    }

    fn is_done(&self) -> bool {
        self.closed
    }
}

/// Collects up to and including a delimiter; the value excludes the delimiter.
#[derive(Debug)]
pub struct LineCollector {
    delimiter: Vec<u8>,
    max_len: usize,
    buf: BytesMut,
    line: Option<Bytes>,
    done: bool,
}

impl LineCollector {
    /// # Panics
    /// Panics if `delimiter` is empty.
    pub fn new(delimiter: &[u8], max_len: usize) -> Self {
        assert!(!delimiter.is_empty(), "delimiter must not be empty");
        Self {
            delimiter: delimiter.to_vec(),
            max_len,
            buf: BytesMut::new(),
            line: None,
            done: false,
        }
    }

    /// The line without its delimiter, until it is taken.
    pub fn line(&self) -> Option<&[u8]> {
        self.line.as_deref()
    }
}

impl Collector for LineCollector {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.done {
            return Ok(Step::done(0));
        }
        let dlen = self.delimiter.len();
        // The delimiter may straddle the previous chunk.
        let rescan = self.buf.len().saturating_sub(dlen - 1);
        let old_len = self.buf.len();
        self.buf.extend_from_slice(data);

        let found = self.buf[rescan..]
            .windows(dlen)
            .position(|w| w == self.delimiter.as_slice())
            .map(|p| p + rescan);

        match found {
            Some(pos) => {
                let end = pos + dlen;
                self.buf.truncate(end);
                let mut line = self.buf.split();
                line.truncate(pos);
                self.line = Some(line.freeze());
                self.done = true;
                Ok(Step::done(end - old_len))
            }
            None if self.buf.len() > self.max_len => Err(CodecError::LineTooLong {
                max_len: self.max_len,
            }),
            None => Ok(Step::more(data.len())),
        }
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        match (self.done, self.buf.len()) {
            (true, _) => Ok(true),
            (false, 0) => Ok(false),
            (false, n) => Err(CodecError::Truncated {
                received: n,
                expected: n + self.delimiter.len(),
            }),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn take_value(&mut self) -> Option<Value> {
        self.line.take().map(Value::Bytes)
    }
}

/// Fires a one-shot callback when the wrapped collector completes.
pub struct OnClose<C, F> {
    inner: C,
    callback: Option<F>,
}

impl<C, F> OnClose<C, F>
where
    C: Collector,
    F: FnOnce(&mut C),
{
    pub fn new(inner: C, callback: F) -> Self {
        Self {
            inner,
            callback: Some(callback),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn fire(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(&mut self.inner);
        }
    }
}

impl<C, F> Collector for OnClose<C, F>
where
    C: Collector,
    F: FnOnce(&mut C),
{
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        let step = self.inner.add_data(data)?;
        if step.done {
            self.fire();
        }
        Ok(step)
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        let complete = self.inner.close()?;
        if complete {
            self.fire();
        }
        Ok(complete)
    }

    fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    fn take_value(&mut self) -> Option<Value> {
        self.inner.take_value()
    }
}

pub trait CollectorExt: Collector + Sized {
    /// Run `callback` exactly once when this collector completes.
    fn on_close<F: FnOnce(&mut Self)>(self, callback: F) -> OnClose<Self, F> {
        OnClose::new(self, callback)
    }

    fn boxed(self) -> Box<dyn Collector>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<C: Collector> CollectorExt for C {}

/// Drive `collector` over `data` until it completes or stops taking bytes.
///
/// Returns the number of bytes consumed.
pub fn feed<C: Collector + ?Sized>(collector: &mut C, data: &[u8]) -> Result<usize, CodecError> {
    let mut offset = 0;
    loop {
        let step = collector.add_data(&data[offset..])?;
        offset += step.consumed;
        if step.done || step.consumed == 0 || offset == data.len() {
            return Ok(offset);
        }
    }
}
