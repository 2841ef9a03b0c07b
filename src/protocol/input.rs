//! Inputs: finite byte-producing tasks
//!
//! An input pushes bytes into a [`Sink`] until the sink stops accepting
//! (returns `0` or `WouldBlock`) or the input is exhausted. Sent bytes are
//! never sent again, so `tick` can be called on every writable event.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use bytes::{Buf, Bytes, BytesMut};
use memmap2::Mmap;

/// Destination for outgoing bytes.
pub trait Sink {
    /// Accept a prefix of `buf`. `Ok(0)` or `WouldBlock` means saturated.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Sink for Vec<u8> {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl Sink for BytesMut {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Outcome of one [`Input::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub sent: usize,
    pub done: bool,
}

pub trait Input {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick>;

    /// Bytes still to be sent, when known.
    fn remaining(&self) -> Option<usize> {
        None
    }

    /// Release resources early; called when an unfinished input is discarded.
    fn close(&mut self) {}
}

impl<I: Input + ?Sized> Input for Box<I> {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick> {
        (**self).tick(sink)
    }

    fn remaining(&self) -> Option<usize> {
        (**self).remaining()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Push `buf` into `sink` until saturated. Returns bytes accepted.
pub(crate) fn push_all(sink: &mut dyn Sink, buf: &[u8]) -> io::Result<usize> {
    let mut sent = 0;
    while sent < buf.len() {
        match sink.send(&buf[sent..]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(sent)
}

/// Sends an in-memory buffer.
#[derive(Debug, Clone)]
pub struct BytesInput {
    buf: Bytes,
}

impl BytesInput {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into() }
    }
}

impl Input for BytesInput {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick> {
        let sent = push_all(sink, &self.buf)?;
        self.buf.advance(sent);
        Ok(Tick {
            sent,
            done: self.buf.is_empty(),
        })
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.buf.len())
    }
}

pub const DEFAULT_FILE_BUFFER: usize = 8 * 1024;

/// Reads from `reader` in `buffer_size` chunks and sends them.
///
/// With `closing == false` the reader survives [`Input::close`] and can be
/// taken back with [`FileInput::into_inner`].
pub struct FileInput<R: Read> {
    reader: Option<R>,
    buf: BytesMut,
    buffer_size: usize,
    remaining: Option<usize>,
    closing: bool,
    eof: bool,
}

impl<R: Read> FileInput<R> {
    pub fn new(reader: R, buffer_size: usize, closing: bool) -> Self {
        Self {
            reader: Some(reader),
            buf: BytesMut::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
            remaining: None,
            closing,
            eof: false,
        }
    }

    /// Declare the total length up front so [`Input::remaining`] can report it.
    pub fn with_length(mut self, length: usize) -> Self {
        self.remaining = Some(length);
        self
    }

    pub fn into_inner(self) -> Option<R> {
        self.reader
    }

    fn fill(&mut self) -> io::Result<()> {
        let Some(reader) = self.reader.as_mut() else {
            self.eof = true;
            return Ok(());
        };
        let start = self.buf.len();
        self.buf.resize(self.buffer_size, 0);
        loop {
            match reader.read(&mut self.buf[start..]) {
                Ok(n) => {
                    self.buf.truncate(start + n);
                    if n == 0 {
                        self.eof = true;
                    }
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e);
                }
            }
        }
    }
}

impl FileInput<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        Ok(Self::new(file, DEFAULT_FILE_BUFFER, true).with_length(len))
    }
}

impl<R: Read> Input for FileInput<R> {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick> {
        let mut sent = 0;
        loop {
            if self.buf.is_empty() {
                if self.eof {
                    self.close();
                    return Ok(Tick { sent, done: true });
                }
                self.fill()?;
                continue;
            }
            let n = push_all(sink, &self.buf)?;
            self.buf.advance(n);
            sent += n;
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining = remaining.saturating_sub(n);
            }
            if !self.buf.is_empty() {
                return Ok(Tick { sent, done: false });
            }
        }
    }

    fn remaining(&self) -> Option<usize> {
        self.remaining
    }

    fn close(&mut self) {
        if self.closing {
            self.reader = None;
        }
    }
}

/// Sends a memory-mapped file without copying it into user buffers.
pub struct MmapInput {
    map: Option<Mmap>,
    pos: usize,
}

impl MmapInput {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    pub fn from_file(file: &File) -> io::Result<Self> {
        // Zero-length files cannot be mapped on every platform.
        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None, pos: 0 });
        }
        // SAFETY: the mapping is read-only; the caller must not truncate the
        // file while the input is alive.
        let map = unsafe { Mmap::map(file)? };
        Ok(Self {
            map: Some(map),
            pos: 0,
        })
    }

    fn data(&self) -> &[u8] {
        match &self.map {
            Some(map) => &map[self.pos..],
            None => &[],
        }
    }
}

impl Input for MmapInput {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick> {
        let sent = push_all(sink, self.data())?;
        self.pos += sent;
        let done = self.data().is_empty();
        if done {
            self.map = None;
            self.pos = 0;
        }
        Ok(Tick { sent, done })
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.data().len())
    }

    fn close(&mut self) {
        self.map = None;
        self.pos = 0;
    }
}

/// Fires a one-shot callback when the wrapped input is exhausted.
pub struct OnDone<I, F> {
    inner: I,
    callback: Option<F>,
}

impl<I: Input, F: FnOnce()> Input for OnDone<I, F> {
    fn tick(&mut self, sink: &mut dyn Sink) -> io::Result<Tick> {
        let tick = self.inner.tick(sink)?;
        if tick.done {
            if let Some(callback) = self.callback.take() {
                callback();
            }
        }
        Ok(tick)
    }

    fn remaining(&self) -> Option<usize> {
        self.inner.remaining()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

pub trait InputExt: Input + Sized {
    /// Run `callback` exactly once when this input has sent everything.
    fn on_close<F: FnOnce()>(self, callback: F) -> OnDone<Self, F> {
        OnDone {
            inner: self,
            callback: Some(callback),
        }
    }

    fn boxed(self) -> Box<dyn Input>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<I: Input> InputExt for I {}
