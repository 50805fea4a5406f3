#![allow(dead_code)]

use audio_stream_engine::audio::{DataCallback, StateCallback};
use audio_stream_engine::host::SimulatedHost;
use audio_stream_engine::{Context, EngineConfig, StreamParams, StreamState};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Harness {
    pub host: Arc<SimulatedHost>,
    pub context: Context,
}

pub fn harness() -> Harness {
    harness_with(SimulatedHost::new(), EngineConfig::default())
}

pub fn harness_with(host: SimulatedHost, config: EngineConfig) -> Harness {
    let host = Arc::new(host);
    let context = Context::with_config(host.clone(), config);
    Harness { host, context }
}

pub fn stereo_f32() -> StreamParams {
    StreamParams::default()
}

pub fn state_channel() -> (StateCallback, Receiver<StreamState>) {
    let (tx, rx) = unbounded();
    let callback: StateCallback = Box::new(move |state| {
        let _ = tx.send(state);
    });
    (callback, rx)
}

pub fn received(rx: &Receiver<StreamState>) -> Vec<StreamState> {
    rx.try_iter().collect()
}

/// Data callback that returns the full period and counts invocations
pub fn full_periods(calls: Arc<AtomicUsize>) -> DataCallback {
    Box::new(move |_input, output, frames| {
        calls.fetch_add(1, Ordering::SeqCst);
        if let Some(out) = output {
            out.fill(0);
        }
        frames as i64
    })
}

pub fn silent() -> DataCallback {
    Box::new(|_input, output, frames| {
        if let Some(out) = output {
            out.fill(0);
        }
        frames as i64
    })
}

pub fn write_f32(bytes: &mut [u8], samples: impl Iterator<Item = f32>) {
    for (chunk, sample) in bytes.chunks_exact_mut(4).zip(samples) {
        chunk.copy_from_slice(&sample.to_ne_bytes());
    }
}

pub fn read_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
