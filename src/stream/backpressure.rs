//! Bounded producer buffers.
//!
//! [`DataStream::from_producer`] runs a producer closure on its own thread
//! and hands items to the consumer through a bounded deque. A full buffer
//! makes the producer wait; an empty one makes the consumer wait. Both sides
//! poll on a short sleep.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::stream::data_stream::{CancellationToken, DataStream};

/// Default wait between polls of a full or empty buffer.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct Buffer<T> {
    queue: VecDeque<T>,
    capacity: usize,
    /// Producer finished (or panicked).
    closed: bool,
    /// Consumer dropped its end.
    abandoned: bool,
    /// Largest occupancy seen.
    high_water: usize,
}

type SharedBuffer<T> = Arc<Mutex<Buffer<T>>>;

/// Producer end handed to the closure passed to [`DataStream::from_producer`].
pub struct Producer<T> {
    buffer: SharedBuffer<T>,
    token: CancellationToken,
    poll: Duration,
}

impl<T> Producer<T> {
    /// Queue an item, waiting while the buffer is full.
    ///
    /// Returns false once the stream is cancelled or the consumer is gone;
    /// the producer should stop then.
    pub fn send(&self, item: T) -> bool {
        let mut item = Some(item);
        loop {
            if self.token.is_cancelled() {
                return false;
            }
            {
                let mut buffer = self.buffer.lock();
                if buffer.abandoned {
                    return false;
                }
                if buffer.queue.len() < buffer.capacity {
                    if let Some(item) = item.take() {
                        buffer.queue.push_back(item);
                    }
                    buffer.high_water = buffer.high_water.max(buffer.queue.len());
                    return true;
                }
            }
            thread::sleep(self.poll);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.buffer.lock().abandoned
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        let mut buffer = self.buffer.lock();
        buffer.closed = true;
        debug!(high_water = buffer.high_water, capacity = buffer.capacity, "Producer closed");
    }
}

struct Receiver<T> {
    buffer: SharedBuffer<T>,
    token: CancellationToken,
    poll: Duration,
}

impl<T> Iterator for Receiver<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            {
                let mut buffer = self.buffer.lock();
                if let Some(item) = buffer.queue.pop_front() {
                    return Some(item);
                }
                if buffer.closed {
                    return None;
                }
            }
            if self.token.is_cancelled() {
                return None;
            }
            thread::sleep(self.poll);
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut buffer = self.buffer.lock();
        buffer.abandoned = true;
        buffer.queue.clear();
    }
}

impl<T: Send + 'static> DataStream<T> {
    /// Stream items produced on a background thread, holding at most
    /// `capacity` of them in memory.
    pub fn from_producer<F>(capacity: usize, produce: F) -> Self
    where
        F: FnOnce(&Producer<T>) + Send + 'static,
    {
        Self::from_producer_with_poll(capacity, DEFAULT_POLL_INTERVAL, produce)
    }

    pub fn from_producer_with_poll<F>(capacity: usize, poll: Duration, produce: F) -> Self
    where
        F: FnOnce(&Producer<T>) + Send + 'static,
    {
        let capacity = capacity.max(1);
        let token = CancellationToken::new();
        let buffer = Arc::new(Mutex::new(Buffer {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
            abandoned: false,
            high_water: 0,
        }));

        let producer = Producer {
            buffer: Arc::clone(&buffer),
            token: token.clone(),
            poll,
        };
        let spawned = thread::Builder::new()
            .name("stream-producer".to_string())
            .spawn(move || produce(&producer));
        if let Err(e) = spawned {
            // The closure (and its producer) dropped with the failed spawn, so
            // the buffer is already closed and the stream ends empty.
            warn!(error = %e, "Failed to spawn producer thread");
        }

        let receiver = Receiver {
            buffer,
            token: token.clone(),
            poll,
        };
        Self::wrap(receiver, token, None, capacity)
    }
}
