//! Realtime period callback
//!
//! Runs on the host's realtime thread once per hardware period and per
//! bus. Never allocates and never logs on the success path. Any failure
//! inside a period shuts the stream down and reports
//! [`StreamState::Error`] instead of unwinding into the host.

use std::sync::Weak;
use thiserror::Error;

use super::buffer::StagingBuffer;
use super::latency::frames_from_timestamp;
use super::pan::pan_stereo;
use super::stream::{Routing, StreamInner, StreamPhase, StreamState};
use crate::error::HostError;
use crate::host::{Bus, HostTimestamp, RenderCallback};

/// Failure inside one realtime period
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeriodError {
    #[error("host call failed: {0}")]
    Host(#[from] HostError),

    #[error("data callback returned {0}")]
    Application(i64),

    #[error("period of {frames} frames exceeds buffer capacity of {capacity}")]
    TooManyFrames { frames: u32, capacity: usize },

    #[error("output period without a buffer")]
    MissingOutput,
}

/// Callback registered with the host. Holds the stream weakly so a
/// destroyed stream is never kept alive by its registration.
pub struct CallbackProxy {
    stream: Weak<StreamInner>,
}

impl CallbackProxy {
    pub(crate) fn new(stream: Weak<StreamInner>) -> Self {
        Self { stream }
    }
}

impl RenderCallback for CallbackProxy {
    fn render(&self, bus: Bus, timestamp: &HostTimestamp, frames: u32, output: Option<&mut [u8]>) {
        let Some(inner) = self.stream.upgrade() else {
            return;
        };
        if let Err(e) = on_period(&inner, bus, timestamp, frames, output) {
            fail(&inner, e);
        }
    }
}

enum Entry {
    Process,
    Drain,
    Skip,
}

fn on_period(
    inner: &StreamInner,
    bus: Bus,
    timestamp: &HostTimestamp,
    frames: u32,
    output: Option<&mut [u8]>,
) -> Result<(), PeriodError> {
    let latency = frames_from_timestamp(inner.host.as_ref(), timestamp, inner.latency_rate());

    let entry = inner.with_status(|s| {
        s.latency.update(latency);
        if s.draining {
            Entry::Drain
        } else if s.shutdown {
            Entry::Skip
        } else {
            Entry::Process
        }
    });

    match (entry, bus) {
        (Entry::Skip, _) => Ok(()),
        (Entry::Drain, Bus::Output) => {
            if let Some(out) = output {
                out.fill(0);
            }
            finish_drain(inner)
        }
        // The output side finishes the drain
        (Entry::Drain, Bus::Input) => Ok(()),
        (Entry::Process, Bus::Output) => {
            let output = output.ok_or(PeriodError::MissingOutput)?;
            render_output(inner, timestamp, frames, output)
        }
        (Entry::Process, Bus::Input) => capture_input(inner, timestamp, frames),
    }
}

/// Output period: gather input if the stream is duplex, run the data
/// callback outside the stream mutex, then account and post-process.
fn render_output(
    inner: &StreamInner,
    timestamp: &HostTimestamp,
    frames: u32,
    output: &mut [u8],
) -> Result<(), PeriodError> {
    let Some(format) = inner.output_format else {
        return Ok(());
    };
    let frames = frames.min((output.len() / format.bytes_per_frame().max(1)) as u32);
    let output = &mut output[..format.frames_to_bytes(frames)];

    let returned = match inner.routing {
        Routing::SharedInline => {
            let mut capture = inner.capture.lock();
            let Some(capture) = capture.as_mut() else {
                return Ok(());
            };
            check_capacity(&capture.staging, frames)?;
            if let Some(unit) = inner.units.input {
                inner
                    .host
                    .render_input(unit, timestamp, frames, capture.staging.frames_mut(frames))?;
            }
            let mut render = inner.render.lock();
            (render.data_callback)(
                Some(capture.staging.frames(frames)),
                Some(&mut *output),
                frames,
            )
        }
        Routing::Buffered => {
            let mut render = inner.render.lock();
            let render = &mut *render;
            match (render.duplex_input.as_mut(), inner.ring.as_ref()) {
                (Some((staging, reader)), Some(ring)) => {
                    check_capacity(staging, frames)?;
                    reader.read(ring, staging.frames_mut(frames));
                    (render.data_callback)(Some(staging.frames(frames)), Some(&mut *output), frames)
                }
                _ => return Ok(()),
            }
        }
        Routing::OutputOnly => {
            let mut render = inner.render.lock();
            (render.data_callback)(None, Some(&mut *output), frames)
        }
        Routing::InputOnly => return Ok(()),
    };

    if returned < 0 {
        output.fill(0);
        return Err(PeriodError::Application(returned));
    }
    let produced = (returned as u64).min(frames as u64) as u32;

    let panning = inner.with_status(|s| {
        s.frames_queued += produced as u64;
        s.frames_played = s.frames_queued;
        if produced < frames && !s.shutdown {
            s.draining = true;
            s.phase = StreamPhase::Draining;
        }
        s.panning
    });

    let produced_bytes = format.frames_to_bytes(produced);
    output[produced_bytes..].fill(0);
    if panning != 0.0 && format.channels() == 2 {
        pan_stereo(&mut output[..produced_bytes], format.format, panning);
    }
    Ok(())
}

/// Input period: render captured frames, convert to the requested rate,
/// then hand them to the application or queue them for the output side
fn capture_input(inner: &StreamInner, timestamp: &HostTimestamp, frames: u32) -> Result<(), PeriodError> {
    let Some(unit) = inner.units.input else {
        return Ok(());
    };
    let mut capture = inner.capture.lock();
    let Some(capture) = capture.as_mut() else {
        return Ok(());
    };

    check_capacity(&capture.staging, frames)?;
    inner
        .host
        .render_input(unit, timestamp, frames, capture.staging.frames_mut(frames))?;

    let (input, input_frames) = match (capture.converter.as_mut(), capture.converted.as_mut()) {
        (Some(converter), Some(converted)) => {
            let count = converter.convert(
                capture.staging.frames(frames),
                frames,
                converted.as_mut_bytes(),
            )?;
            (converted.frames(count), count)
        }
        _ => (capture.staging.frames(frames), frames),
    };

    match inner.routing {
        Routing::InputOnly => {
            let mut render = inner.render.lock();
            let returned = (render.data_callback)(Some(input), None, input_frames);
            if returned < 0 {
                return Err(PeriodError::Application(returned));
            }
        }
        Routing::Buffered => {
            if let Some(ring) = inner.ring.as_ref() {
                ring.push(input);
            }
        }
        Routing::OutputOnly | Routing::SharedInline => {}
    }
    Ok(())
}

fn check_capacity(staging: &StagingBuffer, frames: u32) -> Result<(), PeriodError> {
    if !staging.fits(frames) {
        return Err(PeriodError::TooManyFrames {
            frames,
            capacity: staging.capacity_frames(),
        });
    }
    Ok(())
}

/// The period after a short one: stop output, then a separate input unit,
/// and report `Drained`
fn finish_drain(inner: &StreamInner) -> Result<(), PeriodError> {
    if let Some(unit) = inner.units.output {
        inner.host.stop(unit)?;
    }
    if let Some(unit) = inner.units.distinct_input() {
        inner.host.stop(unit)?;
    }
    inner.with_status(|s| {
        if !s.shutdown {
            s.phase = StreamPhase::Stopped;
        }
    });
    inner.notify(StreamState::Drained);
    Ok(())
}

/// Shut the stream down after a realtime failure. Reports `Error` once.
fn fail(inner: &StreamInner, error: PeriodError) {
    let first = inner.with_status(|s| {
        if s.shutdown {
            return false;
        }
        s.shutdown = true;
        s.draining = false;
        s.phase = StreamPhase::Shutdown;
        true
    });
    if !first {
        return;
    }

    tracing::error!("Stream shut down by realtime failure: {}", error);

    // Units are released again at teardown
    for unit in inner.units.output.into_iter().chain(inner.units.distinct_input()) {
        if let Err(e) = inner.host.stop(unit) {
            tracing::warn!("Stopping unit {:?} after realtime failure: {}", unit, e);
        }
    }
    inner.notify(StreamState::Error);
}
