mod common;

use audio_stream_engine::audio::{DataCallback, Routing};
use audio_stream_engine::host::{
    Bus, DeviceId, Direction, HostOp, SimulatedDevice, SimulatedHost,
};
use audio_stream_engine::{EngineConfig, Stream, StreamPhase, StreamState};
use common::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Copies input to output and records every input block it saw
fn loopback(seen: Arc<Mutex<Vec<Vec<u8>>>>) -> DataCallback {
    Box::new(move |input, output, frames| {
        if let Some(input) = input {
            seen.lock().push(input.to_vec());
            if let Some(out) = output {
                let n = out.len().min(input.len());
                out[..n].copy_from_slice(&input[..n]);
            }
        }
        frames as i64
    })
}

#[test]
fn test_shared_unit_renders_input_inline() {
    let h = harness();
    h.host.set_capture_byte(0x33);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (states, _rx) = state_channel();
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        Some(stereo_f32()),
        10,
        loopback(seen.clone()),
        states,
    )
    .unwrap();

    assert_eq!(stream.routing(), Routing::SharedInline);
    let unit = stream.output_unit().unwrap();
    assert_eq!(stream.input_unit(), Some(unit));
    assert_eq!(h.host.live_units(), 1);
    assert!(!h.host.has_render_callback(unit, Bus::Input));
    assert!(stream.duplex_stats().is_none());

    stream.start().unwrap();
    let rendered = h.host.run_output_period(unit, 480).unwrap();
    assert!(rendered.iter().all(|&b| b == 0x33));
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].len(), 480 * 8);
    assert_eq!(stream.position(), 480);
}

#[test]
fn test_period_larger_than_staging_is_fatal() {
    let h = harness();
    let (states, rx) = state_channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        Some(stereo_f32()),
        10,
        loopback(seen.clone()),
        states,
    )
    .unwrap();
    let unit = stream.output_unit().unwrap();
    stream.start().unwrap();

    // Staging holds the device's 512 frame buffer
    h.host.run_output_period(unit, 1024).unwrap();
    assert!(seen.lock().is_empty());
    assert_eq!(stream.phase(), StreamPhase::Shutdown);
    assert_eq!(received(&rx), vec![StreamState::Started, StreamState::Error]);
}

fn separate_devices() -> SimulatedHost {
    let host = SimulatedHost::new();
    host.add_device(SimulatedDevice::new(2, 48000.0));
    host.set_default_device(Direction::Input, Some(DeviceId(2)));
    host
}

#[test]
fn test_separate_units_through_ring() {
    let h = harness_with(separate_devices(), EngineConfig::default());
    h.host.set_capture_byte(0x44);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (states, rx) = state_channel();
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        Some(stereo_f32()),
        10,
        loopback(seen.clone()),
        states,
    )
    .unwrap();

    assert_eq!(stream.routing(), Routing::Buffered);
    let output = stream.output_unit().unwrap();
    let input = stream.input_unit().unwrap();
    assert_ne!(input, output);
    assert_eq!(h.host.live_units(), 2);
    assert!(h.host.has_render_callback(input, Bus::Input));

    stream.start().unwrap();
    assert!(h.host.is_running(input));
    assert!(h.host.is_running(output));

    assert!(h.host.run_input_period(input, 480));
    let rendered = h.host.run_output_period(output, 480).unwrap();
    assert!(rendered.iter().all(|&b| b == 0x44));
    assert_eq!(stream.duplex_stats().unwrap().underruns, 0);

    // No captured frames queued: input is silence and the underrun is counted
    let rendered = h.host.run_output_period(output, 480).unwrap();
    assert!(rendered.iter().all(|&b| b == 0));
    assert_eq!(stream.duplex_stats().unwrap().underruns, 1);
    assert_eq!(stream.position(), 960);

    stream.stop().unwrap();
    assert!(!h.host.is_running(input));
    assert!(!h.host.is_running(output));
    assert_eq!(
        received(&rx),
        vec![StreamState::Started, StreamState::Stopped]
    );

    drop(stream);
    assert_eq!(h.host.live_units(), 0);
}

#[test]
fn test_ring_overflow_is_counted() {
    let mut config = EngineConfig::default();
    config.stream.duplex_ring_periods = 2;
    let h = harness_with(separate_devices(), config);
    let (states, _rx) = state_channel();
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        Some(stereo_f32()),
        10,
        silent(),
        states,
    )
    .unwrap();
    let input = stream.input_unit().unwrap();
    stream.start().unwrap();

    for _ in 0..3 {
        h.host.run_input_period(input, 480);
    }
    let stats = stream.duplex_stats().unwrap();
    assert_eq!(stats.overflows, 1);
    assert_eq!(stats.queued_blocks, 2);
}

#[test]
fn test_shared_unit_with_converter_uses_ring() {
    let host = SimulatedHost::new();
    host.update_device(DeviceId(1), |d| d.sample_rate = 44100.0);
    let h = harness_with(host, EngineConfig::default());
    let (states, _rx) = state_channel();
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        Some(stereo_f32()),
        10,
        silent(),
        states,
    )
    .unwrap();

    assert_eq!(stream.routing(), Routing::Buffered);
    assert!(stream.has_input_converter());
    let unit = stream.output_unit().unwrap();
    assert_eq!(stream.input_unit(), Some(unit));
    assert!(h.host.has_render_callback(unit, Bus::Input));

    stream.start().unwrap();
    // 512 frames at 44.1 kHz arrive as 557 frames at 48 kHz
    h.host.run_input_period(unit, 512);
    h.host.run_output_period(unit, 480).unwrap();
    assert_eq!(stream.duplex_stats().unwrap().underruns, 0);

    h.host.run_output_period(unit, 480).unwrap();
    assert_eq!(stream.duplex_stats().unwrap().underruns, 1);
}

#[test]
fn test_input_only_delivers_converted_frames() {
    let host = SimulatedHost::new();
    host.update_device(DeviceId(1), |d| d.sample_rate = 44100.0);
    host.set_capture_byte(0x21);
    let h = harness_with(host, EngineConfig::default());

    let frames_seen = Arc::new(Mutex::new(Vec::new()));
    let sink = frames_seen.clone();
    let data: DataCallback = Box::new(move |input, output, frames| {
        assert!(output.is_none());
        if let Some(input) = input {
            assert_eq!(input.len(), frames as usize * 8);
            assert!(input.iter().all(|&b| b == 0x21));
        }
        sink.lock().push(frames);
        frames as i64
    });
    let (states, _rx) = state_channel();
    let stream = Stream::open(&h.context, Some(stereo_f32()), None, 10, data, states).unwrap();
    assert_eq!(stream.routing(), Routing::InputOnly);
    let unit = stream.input_unit().unwrap();

    stream.start().unwrap();
    assert!(h.host.run_input_period(unit, 512));
    assert_eq!(*frames_seen.lock(), vec![557]);
    // Position tracks output only
    assert_eq!(stream.position(), 0);
}

#[test]
fn test_input_only_negative_return() {
    let h = harness();
    let (states, rx) = state_channel();
    let data: DataCallback = Box::new(|_input, _output, _frames| -5);
    let stream = Stream::open(&h.context, Some(stereo_f32()), None, 10, data, states).unwrap();
    let unit = stream.input_unit().unwrap();

    stream.start().unwrap();
    h.host.run_input_period(unit, 256);
    assert_eq!(stream.phase(), StreamPhase::Shutdown);
    assert!(!h.host.is_running(unit));
    assert_eq!(received(&rx), vec![StreamState::Started, StreamState::Error]);
}

#[test]
fn test_buffered_drain_stops_both_units() {
    let h = harness_with(separate_devices(), EngineConfig::default());
    let (states, rx) = state_channel();
    let data: DataCallback = Box::new(|_input, output, frames| {
        if let Some(out) = output {
            out.fill(0);
        }
        (frames / 2) as i64
    });
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        Some(stereo_f32()),
        10,
        data,
        states,
    )
    .unwrap();
    let output = stream.output_unit().unwrap();
    let input = stream.input_unit().unwrap();
    stream.start().unwrap();

    assert!(h.host.run_input_period(input, 480));
    h.host.run_output_period(output, 480).unwrap();
    assert!(stream.is_draining());

    h.host.run_output_period(output, 480).unwrap();
    assert_eq!(stream.phase(), StreamPhase::Stopped);
    assert!(!h.host.is_running(output));
    assert!(!h.host.is_running(input));
    assert!(!h.host.run_input_period(input, 480));
    assert_eq!(
        received(&rx),
        vec![StreamState::Started, StreamState::Drained]
    );

    stream.start().unwrap();
    assert!(h.host.is_running(output));
    assert!(h.host.is_running(input));
}

#[test]
fn test_render_input_failure_shuts_down() {
    let h = harness();
    let (states, rx) = state_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        None,
        10,
        full_periods(calls.clone()),
        states,
    )
    .unwrap();
    let unit = stream.input_unit().unwrap();
    stream.start().unwrap();

    h.host.fail(HostOp::RenderInput, -50);
    assert!(h.host.run_input_period(unit, 256));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stream.phase(), StreamPhase::Shutdown);
    assert!(!h.host.is_running(unit));
    assert_eq!(received(&rx), vec![StreamState::Started, StreamState::Error]);

    // Later periods are ignored
    h.host.clear_failure(HostOp::RenderInput);
    h.host.run_input_period(unit, 256);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(received(&rx).is_empty());
}

#[test]
fn test_convert_failure_shuts_down() {
    let host = SimulatedHost::new();
    host.update_device(DeviceId(1), |d| d.sample_rate = 44100.0);
    host.fail(HostOp::Convert, -66);
    let h = harness_with(host, EngineConfig::default());
    let (states, rx) = state_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let stream = Stream::open(
        &h.context,
        Some(stereo_f32()),
        None,
        10,
        full_periods(calls.clone()),
        states,
    )
    .unwrap();
    assert!(stream.has_input_converter());
    let unit = stream.input_unit().unwrap();
    stream.start().unwrap();

    assert!(h.host.run_input_period(unit, 512));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(stream.phase(), StreamPhase::Shutdown);
    assert!(!h.host.is_running(unit));
    assert_eq!(received(&rx), vec![StreamState::Started, StreamState::Error]);

    drop(stream);
    assert_eq!(h.host.live_units(), 0);
    assert_eq!(h.host.live_converters(), 0);
}
