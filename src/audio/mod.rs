//! Audio stream subsystem

pub mod buffer;
pub mod callback;
pub mod format;
pub mod latency;
pub mod notify;
pub mod pan;
pub mod stream;

pub use buffer::{DuplexRing, RingReader, RingStats, StagingBuffer};
pub use format::{SampleFormat, StreamDescriptor, StreamParams};
pub use latency::{HardwareLatency, LatencyTracker};
pub use stream::{
    DataCallback, DeviceChangedCallback, Routing, StateCallback, Stream, StreamPhase,
    StreamState,
};
