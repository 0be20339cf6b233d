//! Stream processing helpers: sliding windows, grouped folds and a bounded
//! worker pool.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::stream::backpressure::Producer;
use crate::stream::data_stream::DataStream;

#[derive(Debug, Clone)]
pub struct StreamProcessor {
    max_workers: usize,
    batch_size: usize,
    buffer_size: usize,
    poll_interval: Duration,
}

impl StreamProcessor {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            batch_size: config.parallel_batch_size.max(1),
            buffer_size: config.buffer_size.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    /// Backpressured source using the configured buffer size and poll interval.
    pub fn produce<T, F>(&self, produce: F) -> DataStream<T>
    where
        T: Send + 'static,
        F: FnOnce(&Producer<T>) + Send + 'static,
    {
        DataStream::from_producer_with_poll(self.buffer_size, self.poll_interval, produce)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Apply `f` to every full window of `window` items, advancing `step`
    /// items between windows. A trailing partial window is not emitted.
    pub fn process_windowed<T, R, F>(&self, stream: DataStream<T>, window: usize, step: usize, f: F) -> DataStream<R>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: FnMut(&[T]) -> R + Send + 'static,
    {
        let window = window.max(1);
        let step = step.max(1);
        let token = stream.cancellation_token();
        let windows = Windows {
            inner: stream,
            buffer: VecDeque::with_capacity(window),
            window,
            step,
            pending_skip: 0,
            f,
        };
        DataStream::wrap(windows, token, None, window)
    }

    /// Fold items into one accumulator per key.
    pub fn process_grouped<T, K, A, KF, I, F>(&self, stream: DataStream<T>, key: KF, init: I, mut fold: F) -> HashMap<K, A>
    where
        K: Eq + Hash,
        KF: Fn(&T) -> K,
        I: Fn() -> A,
        F: FnMut(A, T) -> A,
    {
        let mut groups: HashMap<K, A> = HashMap::new();
        for item in stream {
            let k = key(&item);
            let acc = groups.remove(&k).unwrap_or_else(&init);
            groups.insert(k, fold(acc, item));
        }
        debug!(groups = groups.len(), "Grouped stream");
        groups
    }

    /// Map `f` over the stream on a bounded pool of worker threads.
    ///
    /// Items are dispatched in batches; results come back in completion
    /// order. A batch whose function call panics is logged and dropped.
    pub fn process_parallel<T, R, F>(&self, stream: DataStream<T>, f: F) -> DataStream<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let token = stream.cancellation_token();
        let f = Arc::new(f);
        let (job_tx, job_rx) = bounded::<(usize, Vec<T>)>(self.max_workers * 2);
        let (result_tx, result_rx) = bounded::<R>(self.batch_size * self.max_workers);

        for worker in 0..self.max_workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let f = Arc::clone(&f);
            let spawned = thread::Builder::new()
                .name(format!("stream-worker-{worker}"))
                .spawn(move || {
                    for (batch_id, batch) in job_rx {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            batch.into_iter().map(|item| (*f)(item)).collect::<Vec<R>>()
                        }));
                        match outcome {
                            Ok(results) => {
                                for result in results {
                                    if result_tx.send(result).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(_) => warn!(worker, batch_id, "Batch panicked, results dropped"),
                        }
                    }
                });
            if let Err(e) = spawned {
                warn!(worker, error = %e, "Failed to spawn stream worker");
            }
        }
        // Workers hold the only result senders; the output ends when they exit.
        drop(result_tx);

        let batch_size = self.batch_size;
        let dispatch = thread::Builder::new()
            .name("stream-dispatch".to_string())
            .spawn(move || {
                let mut batches = 0usize;
                for (batch_id, batch) in stream.batch(batch_size).enumerate() {
                    if job_tx.send((batch_id, batch)).is_err() {
                        break;
                    }
                    batches += 1;
                }
                debug!(batches, "Dispatched all batches");
            });
        if let Err(e) = dispatch {
            warn!(error = %e, "Failed to spawn stream dispatcher");
        }

        DataStream::wrap(result_rx.into_iter(), token, None, self.batch_size)
    }
}

struct Windows<T, F> {
    inner: DataStream<T>,
    buffer: VecDeque<T>,
    window: usize,
    step: usize,
    pending_skip: usize,
    f: F,
}

impl<T: Clone, R, F: FnMut(&[T]) -> R> Iterator for Windows<T, F> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        while self.buffer.len() < self.window {
            let item = self.inner.next()?;
            if self.pending_skip > 0 {
                self.pending_skip -= 1;
                continue;
            }
            self.buffer.push_back(item);
        }

        let result = (self.f)(self.buffer.make_contiguous());

        let drained = self.step.min(self.buffer.len());
        self.buffer.drain(..drained);
        self.pending_skip = self.step - drained;
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> StreamProcessor {
        StreamProcessor::new(&StreamConfig {
            max_workers: 3,
            parallel_batch_size: 4,
            ..Default::default()
        })
    }

    #[test]
    fn test_produce_uses_configured_buffer() {
        let p = StreamProcessor::new(&StreamConfig {
            buffer_size: 2,
            poll_interval_ms: 1,
            ..Default::default()
        });
        assert_eq!(p.buffer_size(), 2);
        let out = p
            .produce(|tx| {
                for i in 0..20u32 {
                    if !tx.send(i) {
                        break;
                    }
                }
            })
            .collect(None);
        assert_eq!(out, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_sliding_windows() {
        let sums = processor()
            .process_windowed(DataStream::from_vec((1..=6).collect::<Vec<i32>>()), 3, 1, |w| w.iter().sum::<i32>())
            .collect(None);
        assert_eq!(sums, vec![6, 9, 12, 15]);
    }

    #[test]
    fn test_tumbling_and_gapped_windows() {
        let p = processor();
        let tumbling = p
            .process_windowed(DataStream::from_vec((0..7).collect::<Vec<i32>>()), 3, 3, |w| w.to_vec())
            .collect(None);
        assert_eq!(tumbling, vec![vec![0, 1, 2], vec![3, 4, 5]]);

        let gapped = p
            .process_windowed(DataStream::from_vec((0..10).collect::<Vec<i32>>()), 2, 4, |w| w.to_vec())
            .collect(None);
        assert_eq!(gapped, vec![vec![0, 1], vec![4, 5], vec![8, 9]]);
    }

    #[test]
    fn test_grouped_fold() {
        let groups = processor().process_grouped(
            DataStream::from_vec((0..10).collect::<Vec<i32>>()),
            |x| x % 3,
            || 0,
            |acc, x| acc + x,
        );
        assert_eq!(groups[&0], 18);
        assert_eq!(groups[&1], 12);
        assert_eq!(groups[&2], 15);
    }

    #[test]
    fn test_parallel_covers_every_item() {
        let mut out = processor()
            .process_parallel(DataStream::from_vec((0..100).collect::<Vec<u64>>()), |x| x * 2)
            .collect(None);
        out.sort_unstable();
        assert_eq!(out, (0..100).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_skips_panicking_batch() {
        // Batches of 4: the batch holding 13 is [12, 13, 14, 15].
        let mut out = processor()
            .process_parallel(DataStream::from_vec((0..20).collect::<Vec<u64>>()), |x| {
                if x == 13 {
                    panic!("bad item");
                }
                x
            })
            .collect(None);
        out.sort_unstable();
        let expected: Vec<u64> = (0..20).filter(|x| !(12..16).contains(x)).collect();
        assert_eq!(out, expected);
    }
}
