//! Lazy data streams with backpressure and cooperative cancellation.
//!
//! - [`data_stream`]: The stream type, its sources and transforms
//! - [`backpressure`]: Producer-thread sources over a bounded buffer
//! - [`processor`]: Windowed, grouped and parallel processing

pub mod backpressure;
pub mod data_stream;
pub mod processor;

pub use backpressure::Producer;
pub use data_stream::{CancellationToken, DataStream, StreamMetadata, StreamState};
pub use processor::StreamProcessor;
