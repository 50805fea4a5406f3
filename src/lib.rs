//! # Audio Stream Engine
//!
//! Real-time audio stream engine: opens hardware-backed input/output
//! endpoints through a host audio subsystem, negotiates formats and drives
//! a per-period callback that exchanges frames with application code while
//! keeping position and latency accounting.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        CONTROL THREAD (application)                       │
//! │                                                                          │
//! │   Context ──acquire_slot──▶ Stream::open ──▶ start / stop / position     │
//! │   (stream cap)                   │            latency / volume / pan     │
//! │                                  │            destroy                    │
//! │                                  ▼                                       │
//! │  ┌────────────────────────────────────────────────────────────────────┐  │
//! │  │                     StreamInner (audio::stream)                     │  │
//! │  │   state mutex: counters, latency, flags, pan, phase                 │  │
//! │  │   capture side: staging buffer, converter, duplex ring writer       │  │
//! │  │   render side:  data callback, duplex ring reader                   │  │
//! │  └────────────────────────────────────────────────────────────────────┘  │
//! │            ▲ weak refs                              ▲ weak refs           │
//! └────────────┼────────────────────────────────────────┼────────────────────┘
//!              │                                        │
//! ┌────────────┼────────────────────────┐   ┌───────────┼──────────────────────┐
//! │  REALTIME THREAD (host::AudioHost)  │   │  NOTIFICATION THREAD (host)       │
//! │                                     │   │                                   │
//! │  RenderCallback (audio::callback)   │   │  PropertyListener (audio::notify) │
//! │   1. lock, update latency           │   │   default device / data source    │
//! │   2. drain / shutdown checks        │   │   ──▶ device-changed callback     │
//! │   3. unlock, data callback          │   └───────────────────────────────────┘
//! │   4. lock, counters + drain flag    │
//! │   5. silence padding, stereo pan    │
//! │                                     │
//! │  Input ──▶ staging ──▶ converter ──▶ DuplexRing ──▶ output side (duplex)  │
//! └─────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod logging;

pub use audio::{
    SampleFormat, Stream, StreamDescriptor, StreamParams, StreamPhase, StreamState,
};
pub use config::EngineConfig;
pub use context::Context;
pub use error::{Error, HostError, Result, StreamError};

/// Engine-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u32 = 2;

    /// Stream cap applied on host versions that limit concurrent streams
    pub const STREAM_MAX: usize = 8;

    /// Capture blocks held by a duplex ring
    pub const DUPLEX_RING_PERIODS: usize = 4;

    /// Highest channel count a stream descriptor accepts
    pub const MAX_CHANNELS: u32 = 32;

    pub const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

    /// Identifier reported by [`crate::Context::backend_id`]
    pub const BACKEND_ID: &str = "audiounit";
}
