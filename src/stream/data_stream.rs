//! Lazy, cancellable item streams.
//!
//! A [`DataStream`] wraps any `Send` iterator with progress metadata, a state
//! machine and a shared [`CancellationToken`]. Transforms consume the stream
//! and return a new one around it; every layer checks the token before it
//! yields, so cancelling any handle stops the whole pipeline at the next
//! item boundary.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::value::Table;

/// Cooperative cancellation flag shared by every layer of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Created,
    Iterating,
    Exhausted,
    Cancelled,
}

/// Progress information. Mutated only by the owning stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMetadata {
    pub total_items: Option<u64>,
    pub processed_items: u64,
    pub bytes_processed: u64,
    #[serde(skip_serializing)]
    pub start_time: Instant,
    pub chunk_size: usize,
}

impl StreamMetadata {
    fn new(total_items: Option<u64>, chunk_size: usize) -> Self {
        Self {
            total_items,
            processed_items: 0,
            bytes_processed: 0,
            start_time: Instant::now(),
            chunk_size,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Items per second since the stream was created.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.processed_items as f64 / secs
        }
    }
}

type Source<T> = Box<dyn Iterator<Item = T> + Send>;

pub struct DataStream<T> {
    source: Source<T>,
    token: CancellationToken,
    metadata: StreamMetadata,
    state: StreamState,
    measure: Option<fn(&T) -> u64>,
}

impl<T: Send + 'static> DataStream<T> {
    pub(crate) fn wrap<I>(source: I, token: CancellationToken, total_items: Option<u64>, chunk_size: usize) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        Self {
            source: Box::new(source),
            token,
            metadata: StreamMetadata::new(total_items, chunk_size),
            state: StreamState::Created,
            measure: None,
        }
    }

    fn measured(mut self, measure: fn(&T) -> u64) -> Self {
        self.measure = Some(measure);
        self
    }

    /// Stream over an owned vector. The total is known.
    pub fn from_vec(items: Vec<T>) -> Self {
        let total = items.len() as u64;
        Self::wrap(items.into_iter(), CancellationToken::new(), Some(total), 1)
    }

    /// Stream over any iterator. The total is unknown.
    pub fn from_source<I>(source: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::wrap(source.into_iter(), CancellationToken::new(), None, 1)
    }

    // Transforms. Each one consumes `self` and wraps it, so the inner layer
    // keeps checking the shared token.

    pub fn map<U, F>(self, f: F) -> DataStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let (token, total, chunk) = self.lineage();
        DataStream::wrap(self.map_items(f), token, total, chunk)
    }

    pub fn filter<F>(self, predicate: F) -> DataStream<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        let (token, _, chunk) = self.lineage();
        DataStream::wrap(self.filter_items(predicate), token, None, chunk)
    }

    /// Group consecutive items into vectors of `size`. The last batch may be short.
    pub fn batch(self, size: usize) -> DataStream<Vec<T>> {
        let size = size.max(1);
        let (token, total, _) = self.lineage();
        let total = total.map(|t| t.div_ceil(size as u64));
        DataStream::wrap(Batches { inner: self, size }, token, total, size)
    }

    pub fn take(self, n: usize) -> DataStream<T> {
        let (token, total, chunk) = self.lineage();
        let total = total.map(|t| t.min(n as u64));
        DataStream::wrap(self.take_items(n), token, total, chunk)
    }

    pub fn skip(self, n: usize) -> DataStream<T> {
        let (token, total, chunk) = self.lineage();
        let total = total.map(|t| t.saturating_sub(n as u64));
        DataStream::wrap(self.skip_items(n), token, total, chunk)
    }

    fn lineage(&self) -> (CancellationToken, Option<u64>, usize) {
        (self.token.clone(), self.metadata.total_items, self.metadata.chunk_size)
    }

    fn map_items<U, F: FnMut(T) -> U>(self, f: F) -> std::iter::Map<Self, F> {
        Iterator::map(self, f)
    }

    fn filter_items<F: FnMut(&T) -> bool>(self, f: F) -> std::iter::Filter<Self, F> {
        Iterator::filter(self, f)
    }

    fn take_items(self, n: usize) -> std::iter::Take<Self> {
        Iterator::take(self, n)
    }

    fn skip_items(self, n: usize) -> std::iter::Skip<Self> {
        Iterator::skip(self, n)
    }

    /// Materialize up to `max_items` items (all of them when `None`).
    ///
    /// Everything collected is held in memory.
    pub fn collect(mut self, max_items: Option<usize>) -> Vec<T> {
        let mut out = Vec::new();
        while max_items.map_or(true, |max| out.len() < max) {
            match self.next() {
                Some(item) => out.push(item),
                None => return out,
            }
        }
        // One item of lookahead tells a cap from exhaustion.
        if self.next().is_some() {
            warn!(collected = out.len(), "Stream collection stopped at item cap");
        }
        out
    }
}

impl<T> DataStream<T> {
    /// Fraction of the stream consumed.
    ///
    /// With an unknown total this is 0 until the stream is exhausted, then 1.
    pub fn get_progress(&self) -> f64 {
        if self.state == StreamState::Exhausted {
            return 1.0;
        }
        match self.metadata.total_items {
            Some(0) => 1.0,
            Some(total) => (self.metadata.processed_items as f64 / total as f64).min(1.0),
            None => 0.0,
        }
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Cancel this stream and every stream sharing its token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<T> Iterator for DataStream<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.state {
            StreamState::Exhausted | StreamState::Cancelled => return None,
            StreamState::Created | StreamState::Iterating => {}
        }
        if self.token.is_cancelled() {
            self.state = StreamState::Cancelled;
            debug!(processed = self.metadata.processed_items, "Stream cancelled");
            return None;
        }

        self.state = StreamState::Iterating;
        match self.source.next() {
            Some(item) => {
                self.metadata.processed_items += 1;
                if let Some(measure) = self.measure {
                    self.metadata.bytes_processed += measure(&item);
                }
                Some(item)
            }
            None => {
                self.state = if self.token.is_cancelled() {
                    StreamState::Cancelled
                } else {
                    StreamState::Exhausted
                };
                None
            }
        }
    }
}

struct Batches<T> {
    inner: DataStream<T>,
    size: usize,
}

impl<T> Iterator for Batches<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        let mut batch = Vec::with_capacity(self.size);
        while batch.len() < self.size {
            match self.inner.next() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        if batch.is_empty() || self.inner.state() == StreamState::Cancelled {
            None
        } else {
            Some(batch)
        }
    }
}

impl DataStream<String> {
    /// Stream the lines of a text file. The total comes from a line count
    /// taken up front.
    pub fn from_lines(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let total = BufReader::new(File::open(path)?).lines().count() as u64;
        let reader = BufReader::with_capacity(chunk_size.max(1) * 64, File::open(path)?);
        let shown = path.display().to_string();

        let lines = reader.lines().map_while(move |line| match line {
            Ok(line) => Some(line),
            Err(e) => {
                warn!(path = %shown, error = %e, "Line stream stopped on read error");
                None
            }
        });

        debug!(path = %path.display(), total, "Opened line stream");
        Ok(Self::wrap(lines, CancellationToken::new(), Some(total), chunk_size.max(1))
            .measured(|line| line.len() as u64 + 1))
    }
}

impl DataStream<Vec<u8>> {
    /// Stream a file in fixed-size byte chunks. The last chunk may be short.
    pub fn from_chunks(path: &Path, chunk_bytes: usize) -> io::Result<Self> {
        let chunk_bytes = chunk_bytes.max(1);
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let total = len.div_ceil(chunk_bytes as u64);

        let chunks = ByteChunks {
            reader: BufReader::new(file),
            chunk_bytes,
            path: path.display().to_string(),
        };
        Ok(Self::wrap(chunks, CancellationToken::new(), Some(total), chunk_bytes)
            .measured(|chunk| chunk.len() as u64))
    }
}

struct ByteChunks {
    reader: BufReader<File>,
    chunk_bytes: usize,
    path: String,
}

impl Iterator for ByteChunks {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let mut chunk = Vec::with_capacity(self.chunk_bytes);
        match (&mut self.reader).take(self.chunk_bytes as u64).read_to_end(&mut chunk) {
            Ok(0) => None,
            Ok(_) => Some(chunk),
            Err(e) => {
                warn!(path = %self.path, error = %e, "Chunk stream stopped on read error");
                None
            }
        }
    }
}

impl DataStream<Table> {
    /// Stream a table as row slices of `chunk_rows`.
    pub fn from_table(table: Table, chunk_rows: usize) -> Self {
        let chunk_rows = chunk_rows.max(1);
        let rows = table.num_rows();
        let total = rows.div_ceil(chunk_rows) as u64;
        let slices = (0..rows)
            .step_by(chunk_rows)
            .map(move |offset| table.slice(offset, chunk_rows));
        Self::wrap(slices, CancellationToken::new(), Some(total), chunk_rows)
            .measured(|slice| slice.estimated_size())
    }
}
