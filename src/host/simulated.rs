//! In-memory host audio subsystem
//!
//! Implements every [`AudioHost`] operation without hardware: devices,
//! units and listeners live in a table behind one lock, periods are driven
//! explicitly with [`SimulatedHost::run_output_period`] and
//! [`SimulatedHost::run_input_period`], and any operation can be made to
//! fail with [`SimulatedHost::fail`]. Render callbacks and property
//! listeners are always invoked with the host lock released, so they may
//! call back into the host.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    AudioHost, Bus, ConverterQuality, DeviceId, Direction, FormatConverter, HostResult,
    HostTimestamp, ListenerId, ObjectId, PropertyAddress, PropertyListener, PropertySelector,
    RenderCallback, Scope, UnitId,
};
use crate::audio::format::{SampleFormat, StreamDescriptor, StreamParams};
use crate::error::HostError;

/// Status returned for unknown handles
pub const ERR_BAD_HANDLE: i32 = -50;
/// Status returned when a property has no value yet
pub const ERR_INVALID_PROPERTY: i32 = -10851;

/// Byte written into output buffers before the render callback runs
pub const OUTPUT_SENTINEL: u8 = 0x5A;

/// Host operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    NewUnit,
    DisposeUnit,
    EnableIo,
    DefaultDevice,
    SetCurrentDevice,
    StreamFormat,
    SetStreamFormat,
    BufferFrameSize,
    SetBufferFrameSize,
    BufferFrameSizeRange,
    SetMaxFramesPerSlice,
    SetRenderCallback,
    Initialize,
    Uninitialize,
    Start,
    Stop,
    RenderInput,
    SetVolume,
    UnitLatency,
    DeviceLatency,
    SafetyOffset,
    NewConverter,
    ConverterQuality,
    Convert,
    AddListener,
    RemoveListener,
}

impl HostOp {
    pub fn name(self) -> &'static str {
        match self {
            HostOp::NewUnit => "new_unit",
            HostOp::DisposeUnit => "dispose_unit",
            HostOp::EnableIo => "enable_io",
            HostOp::DefaultDevice => "default_device",
            HostOp::SetCurrentDevice => "set_current_device",
            HostOp::StreamFormat => "stream_format",
            HostOp::SetStreamFormat => "set_stream_format",
            HostOp::BufferFrameSize => "buffer_frame_size",
            HostOp::SetBufferFrameSize => "set_buffer_frame_size",
            HostOp::BufferFrameSizeRange => "buffer_frame_size_range",
            HostOp::SetMaxFramesPerSlice => "set_max_frames_per_slice",
            HostOp::SetRenderCallback => "set_render_callback",
            HostOp::Initialize => "initialize",
            HostOp::Uninitialize => "uninitialize",
            HostOp::Start => "start",
            HostOp::Stop => "stop",
            HostOp::RenderInput => "render_input",
            HostOp::SetVolume => "set_volume",
            HostOp::UnitLatency => "unit_latency_seconds",
            HostOp::DeviceLatency => "device_latency_frames",
            HostOp::SafetyOffset => "device_safety_offset",
            HostOp::NewConverter => "new_converter",
            HostOp::ConverterQuality => "converter_set_quality",
            HostOp::Convert => "convert",
            HostOp::AddListener => "add_property_listener",
            HostOp::RemoveListener => "remove_property_listener",
        }
    }
}

/// A simulated hardware device
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDevice {
    pub id: DeviceId,
    /// Native sample rate
    pub sample_rate: f64,
    pub channels: u32,
    /// Default buffer frame size
    pub buffer_frames: u32,
    pub buffer_range: (f64, f64),
    pub latency_frames: u32,
    pub safety_offset: u32,
}

impl SimulatedDevice {
    pub fn new(id: u32, sample_rate: f64) -> Self {
        Self {
            id: DeviceId(id),
            sample_rate,
            channels: 2,
            buffer_frames: 512,
            buffer_range: (64.0, 4096.0),
            latency_frames: 0,
            safety_offset: 0,
        }
    }
}

#[derive(Default)]
struct UnitState {
    input_enabled: bool,
    output_enabled: bool,
    input_device: Option<DeviceId>,
    output_device: Option<DeviceId>,
    formats: HashMap<(Scope, Bus), StreamDescriptor>,
    buffer_frames: HashMap<Bus, u32>,
    max_frames_per_slice: Option<u32>,
    callbacks: HashMap<Bus, Arc<dyn RenderCallback>>,
    initialized: bool,
    running: bool,
    volume: f32,
}

impl UnitState {
    fn device_for(&self, bus: Bus) -> Option<DeviceId> {
        match bus {
            Bus::Input => self.input_device.or(self.output_device),
            Bus::Output => self.output_device.or(self.input_device),
        }
    }
}

struct Listener {
    object: ObjectId,
    address: PropertyAddress,
    listener: Arc<dyn PropertyListener>,
}

struct HostState {
    devices: HashMap<DeviceId, SimulatedDevice>,
    default_output: Option<DeviceId>,
    default_input: Option<DeviceId>,
    units: HashMap<UnitId, UnitState>,
    next_unit: u64,
    listeners: HashMap<ListenerId, Listener>,
    next_listener: u64,
    failures: HashMap<HostOp, i32>,
    clock: u64,
    timebase: (u64, u64),
    presentation_offset: u64,
    timestamps_valid: bool,
    sample_time: f64,
    unit_latency_seconds: f64,
    capture_byte: u8,
    limits_streams: bool,
}

impl HostState {
    fn check(&self, op: HostOp) -> HostResult<()> {
        match self.failures.get(&op) {
            Some(&status) => Err(HostError::new(op.name(), status)),
            None => Ok(()),
        }
    }

    fn unit(&self, op: HostOp, unit: UnitId) -> HostResult<&UnitState> {
        self.check(op)?;
        self.units
            .get(&unit)
            .ok_or_else(|| HostError::new(op.name(), ERR_BAD_HANDLE))
    }

    fn unit_mut(&mut self, op: HostOp, unit: UnitId) -> HostResult<&mut UnitState> {
        self.check(op)?;
        self.units
            .get_mut(&unit)
            .ok_or_else(|| HostError::new(op.name(), ERR_BAD_HANDLE))
    }

    fn device(&self, op: HostOp, device: DeviceId) -> HostResult<&SimulatedDevice> {
        self.check(op)?;
        self.devices
            .get(&device)
            .ok_or_else(|| HostError::new(op.name(), ERR_BAD_HANDLE))
    }

    fn next_timestamp(&mut self, frames: u32) -> HostTimestamp {
        let ts = HostTimestamp {
            host_time: self.clock + self.presentation_offset,
            host_time_valid: self.timestamps_valid,
            sample_time: self.sample_time,
        };
        self.sample_time += frames as f64;
        ts
    }
}

/// Software host used for offline rendering and tests
pub struct SimulatedHost {
    state: Mutex<HostState>,
    live_converters: Arc<AtomicUsize>,
}

impl SimulatedHost {
    /// A host with one 48 kHz stereo device serving as both the default
    /// input and output
    pub fn new() -> Self {
        let device = SimulatedDevice::new(1, 48000.0);
        let id = device.id;
        let mut devices = HashMap::new();
        devices.insert(id, device);

        Self {
            state: Mutex::new(HostState {
                devices,
                default_output: Some(id),
                default_input: Some(id),
                units: HashMap::new(),
                next_unit: 1,
                listeners: HashMap::new(),
                next_listener: 1,
                failures: HashMap::new(),
                clock: 0,
                timebase: (1, 1),
                presentation_offset: 0,
                timestamps_valid: true,
                sample_time: 0.0,
                unit_latency_seconds: 0.0,
                capture_byte: 0x11,
                limits_streams: false,
            }),
            live_converters: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add or replace a device
    pub fn add_device(&self, device: SimulatedDevice) {
        self.state.lock().devices.insert(device.id, device);
    }

    /// Change a device in place. Returns false if it does not exist.
    pub fn update_device(&self, id: DeviceId, f: impl FnOnce(&mut SimulatedDevice)) -> bool {
        match self.state.lock().devices.get_mut(&id) {
            Some(device) => {
                f(device);
                true
            }
            None => false,
        }
    }

    pub fn set_default_device(&self, direction: Direction, device: Option<DeviceId>) {
        let mut state = self.state.lock();
        match direction {
            Direction::Input => state.default_input = device,
            Direction::Output => state.default_output = device,
        }
    }

    /// Make every later call of `op` fail with `status`
    pub fn fail(&self, op: HostOp, status: i32) {
        self.state.lock().failures.insert(op, status);
    }

    pub fn clear_failure(&self, op: HostOp) {
        self.state.lock().failures.remove(&op);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Host ticks to nanoseconds is `ticks * numer / denom`
    pub fn set_timebase(&self, numer: u64, denom: u64) {
        self.state.lock().timebase = (numer, denom.max(1));
    }

    pub fn advance_clock(&self, ticks: u64) {
        self.state.lock().clock += ticks;
    }

    /// Ticks between the current clock and the presentation time of
    /// generated timestamps
    pub fn set_presentation_offset(&self, ticks: u64) {
        self.state.lock().presentation_offset = ticks;
    }

    pub fn set_timestamps_valid(&self, valid: bool) {
        self.state.lock().timestamps_valid = valid;
    }

    pub fn set_unit_latency_seconds(&self, seconds: f64) {
        self.state.lock().unit_latency_seconds = seconds;
    }

    /// Byte pattern produced by input rendering
    pub fn set_capture_byte(&self, byte: u8) {
        self.state.lock().capture_byte = byte;
    }

    pub fn set_limits_concurrent_streams(&self, limited: bool) {
        self.state.lock().limits_streams = limited;
    }

    // Resource counters

    pub fn live_units(&self) -> usize {
        self.state.lock().units.len()
    }

    pub fn live_converters(&self) -> usize {
        self.live_converters.load(Ordering::SeqCst)
    }

    pub fn live_listeners(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub fn units(&self) -> Vec<UnitId> {
        let mut units: Vec<_> = self.state.lock().units.keys().copied().collect();
        units.sort_by_key(|u| u.0);
        units
    }

    pub fn is_running(&self, unit: UnitId) -> bool {
        self.state
            .lock()
            .units
            .get(&unit)
            .map(|u| u.running)
            .unwrap_or(false)
    }

    pub fn is_initialized(&self, unit: UnitId) -> bool {
        self.state
            .lock()
            .units
            .get(&unit)
            .map(|u| u.initialized)
            .unwrap_or(false)
    }

    pub fn volume(&self, unit: UnitId) -> Option<f32> {
        self.state.lock().units.get(&unit).map(|u| u.volume)
    }

    pub fn max_frames_per_slice(&self, unit: UnitId) -> Option<u32> {
        self.state
            .lock()
            .units
            .get(&unit)
            .and_then(|u| u.max_frames_per_slice)
    }

    pub fn has_render_callback(&self, unit: UnitId, bus: Bus) -> bool {
        self.state
            .lock()
            .units
            .get(&unit)
            .map(|u| u.callbacks.contains_key(&bus))
            .unwrap_or(false)
    }

    /// The callback registered on `unit`/`bus`, for invoking it directly
    pub fn render_callback(&self, unit: UnitId, bus: Bus) -> Option<Arc<dyn RenderCallback>> {
        self.state
            .lock()
            .units
            .get(&unit)
            .and_then(|u| u.callbacks.get(&bus).cloned())
    }

    // Period drivers

    /// Run one output period on a started unit and return the rendered
    /// bytes. `None` if the unit is not running or has no output callback.
    pub fn run_output_period(&self, unit: UnitId, frames: u32) -> Option<Vec<u8>> {
        let (callback, bytes_per_frame, timestamp) = {
            let mut state = self.state.lock();
            let u = state.units.get(&unit)?;
            if !u.running {
                return None;
            }
            let callback = u.callbacks.get(&Bus::Output)?.clone();
            let bytes_per_frame = u
                .formats
                .get(&(Scope::Input, Bus::Output))
                .map(|d| d.bytes_per_frame())
                .unwrap_or(8);
            (callback, bytes_per_frame, state.next_timestamp(frames))
        };

        let mut buffer = vec![OUTPUT_SENTINEL; frames as usize * bytes_per_frame];
        callback.render(Bus::Output, &timestamp, frames, Some(&mut buffer));
        Some(buffer)
    }

    /// Run one input period on a started unit. Returns whether a callback ran.
    pub fn run_input_period(&self, unit: UnitId, frames: u32) -> bool {
        let (callback, timestamp) = {
            let mut state = self.state.lock();
            let Some(u) = state.units.get(&unit) else {
                return false;
            };
            if !u.running {
                return false;
            }
            let Some(callback) = u.callbacks.get(&Bus::Input).cloned() else {
                return false;
            };
            (callback, state.next_timestamp(frames))
        };

        callback.render(Bus::Input, &timestamp, frames, None);
        true
    }

    /// Notify listeners registered for `selector` on `object`. Returns how
    /// many were called.
    pub fn fire_property_changed(&self, object: ObjectId, selector: PropertySelector) -> usize {
        let matching: Vec<_> = {
            let state = self.state.lock();
            state
                .listeners
                .values()
                .filter(|l| l.object == object && l.address.selector == selector)
                .map(|l| (l.address, Arc::clone(&l.listener)))
                .collect()
        };

        for (address, listener) in &matching {
            listener.on_properties_changed(object, std::slice::from_ref(address));
        }
        matching.len()
    }

    fn device_format(device: &SimulatedDevice) -> HostResult<StreamDescriptor> {
        let params = StreamParams::new(
            SampleFormat::FLOAT32NE,
            device.sample_rate as u32,
            device.channels,
        );
        StreamDescriptor::from_params(&params)
            .map_err(|_| HostError::new(HostOp::StreamFormat.name(), ERR_INVALID_PROPERTY))
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHost for SimulatedHost {
    fn new_unit(&self) -> HostResult<UnitId> {
        let mut state = self.state.lock();
        state.check(HostOp::NewUnit)?;
        let id = UnitId(state.next_unit);
        state.next_unit += 1;
        state.units.insert(
            id,
            UnitState {
                volume: 1.0,
                ..Default::default()
            },
        );
        Ok(id)
    }

    fn dispose_unit(&self, unit: UnitId) -> HostResult<()> {
        let mut state = self.state.lock();
        state.check(HostOp::DisposeUnit)?;
        state
            .units
            .remove(&unit)
            .map(|_| ())
            .ok_or_else(|| HostError::new(HostOp::DisposeUnit.name(), ERR_BAD_HANDLE))
    }

    fn enable_io(&self, unit: UnitId, bus: Bus, enable: bool) -> HostResult<()> {
        let mut state = self.state.lock();
        let u = state.unit_mut(HostOp::EnableIo, unit)?;
        match bus {
            Bus::Input => u.input_enabled = enable,
            Bus::Output => u.output_enabled = enable,
        }
        Ok(())
    }

    fn default_device(&self, direction: Direction) -> HostResult<DeviceId> {
        let state = self.state.lock();
        state.check(HostOp::DefaultDevice)?;
        let device = match direction {
            Direction::Input => state.default_input,
            Direction::Output => state.default_output,
        };
        device.ok_or_else(|| HostError::new(HostOp::DefaultDevice.name(), ERR_INVALID_PROPERTY))
    }

    fn set_current_device(&self, unit: UnitId, bus: Bus, device: DeviceId) -> HostResult<()> {
        let mut state = self.state.lock();
        state.device(HostOp::SetCurrentDevice, device)?;
        let u = state.unit_mut(HostOp::SetCurrentDevice, unit)?;
        match bus {
            Bus::Input => u.input_device = Some(device),
            Bus::Output => u.output_device = Some(device),
        }
        Ok(())
    }

    fn stream_format(&self, unit: UnitId, scope: Scope, bus: Bus) -> HostResult<StreamDescriptor> {
        let state = self.state.lock();
        let u = state.unit(HostOp::StreamFormat, unit)?;
        if let Some(format) = u.formats.get(&(scope, bus)) {
            return Ok(*format);
        }

        // Hardware side of the bus reports the device's native format
        let device = u
            .device_for(bus)
            .and_then(|id| state.devices.get(&id))
            .ok_or_else(|| HostError::new(HostOp::StreamFormat.name(), ERR_INVALID_PROPERTY))?;
        Self::device_format(device)
    }

    fn set_stream_format(
        &self,
        unit: UnitId,
        scope: Scope,
        bus: Bus,
        format: &StreamDescriptor,
    ) -> HostResult<()> {
        let mut state = self.state.lock();
        let u = state.unit_mut(HostOp::SetStreamFormat, unit)?;
        u.formats.insert((scope, bus), *format);
        Ok(())
    }

    fn buffer_frame_size(&self, unit: UnitId, bus: Bus) -> HostResult<u32> {
        let state = self.state.lock();
        let u = state.unit(HostOp::BufferFrameSize, unit)?;
        if let Some(&frames) = u.buffer_frames.get(&bus) {
            return Ok(frames);
        }
        u.device_for(bus)
            .and_then(|id| state.devices.get(&id))
            .map(|d| d.buffer_frames)
            .ok_or_else(|| HostError::new(HostOp::BufferFrameSize.name(), ERR_INVALID_PROPERTY))
    }

    fn set_buffer_frame_size(&self, unit: UnitId, bus: Bus, frames: u32) -> HostResult<()> {
        let mut state = self.state.lock();
        let u = state.unit_mut(HostOp::SetBufferFrameSize, unit)?;
        u.buffer_frames.insert(bus, frames);
        Ok(())
    }

    fn buffer_frame_size_range(&self, device: DeviceId) -> HostResult<(f64, f64)> {
        let state = self.state.lock();
        Ok(state.device(HostOp::BufferFrameSizeRange, device)?.buffer_range)
    }

    fn set_max_frames_per_slice(&self, unit: UnitId, frames: u32) -> HostResult<()> {
        let mut state = self.state.lock();
        state.unit_mut(HostOp::SetMaxFramesPerSlice, unit)?.max_frames_per_slice = Some(frames);
        Ok(())
    }

    fn set_render_callback(
        &self,
        unit: UnitId,
        bus: Bus,
        callback: Arc<dyn RenderCallback>,
    ) -> HostResult<()> {
        let mut state = self.state.lock();
        state
            .unit_mut(HostOp::SetRenderCallback, unit)?
            .callbacks
            .insert(bus, callback);
        Ok(())
    }

    fn initialize(&self, unit: UnitId) -> HostResult<()> {
        let mut state = self.state.lock();
        state.unit_mut(HostOp::Initialize, unit)?.initialized = true;
        Ok(())
    }

    fn uninitialize(&self, unit: UnitId) -> HostResult<()> {
        let mut state = self.state.lock();
        let u = state.unit_mut(HostOp::Uninitialize, unit)?;
        u.initialized = false;
        u.running = false;
        Ok(())
    }

    fn start(&self, unit: UnitId) -> HostResult<()> {
        let mut state = self.state.lock();
        let u = state.unit_mut(HostOp::Start, unit)?;
        if !u.initialized {
            return Err(HostError::new(HostOp::Start.name(), ERR_INVALID_PROPERTY));
        }
        u.running = true;
        Ok(())
    }

    fn stop(&self, unit: UnitId) -> HostResult<()> {
        let mut state = self.state.lock();
        state.unit_mut(HostOp::Stop, unit)?.running = false;
        Ok(())
    }

    fn render_input(
        &self,
        unit: UnitId,
        _timestamp: &HostTimestamp,
        frames: u32,
        dest: &mut [u8],
    ) -> HostResult<()> {
        let state = self.state.lock();
        let u = state.unit(HostOp::RenderInput, unit)?;
        if !u.input_enabled {
            return Err(HostError::new(HostOp::RenderInput.name(), ERR_INVALID_PROPERTY));
        }
        let bytes_per_frame = u
            .formats
            .get(&(Scope::Output, Bus::Input))
            .map(|d| d.bytes_per_frame())
            .unwrap_or(0);
        let len = (frames as usize * bytes_per_frame).min(dest.len());
        dest[..len].fill(state.capture_byte);
        Ok(())
    }

    fn set_volume(&self, unit: UnitId, gain: f32) -> HostResult<()> {
        let mut state = self.state.lock();
        state.unit_mut(HostOp::SetVolume, unit)?.volume = gain;
        Ok(())
    }

    fn unit_latency_seconds(&self, unit: UnitId) -> HostResult<f64> {
        let state = self.state.lock();
        state.unit(HostOp::UnitLatency, unit)?;
        Ok(state.unit_latency_seconds)
    }

    fn device_latency_frames(&self, device: DeviceId, _direction: Direction) -> HostResult<u32> {
        let state = self.state.lock();
        Ok(state.device(HostOp::DeviceLatency, device)?.latency_frames)
    }

    fn device_safety_offset(&self, device: DeviceId, _direction: Direction) -> HostResult<u32> {
        let state = self.state.lock();
        Ok(state.device(HostOp::SafetyOffset, device)?.safety_offset)
    }

    fn new_converter(
        &self,
        from: &StreamDescriptor,
        to: &StreamDescriptor,
    ) -> HostResult<Box<dyn FormatConverter>> {
        let state = self.state.lock();
        state.check(HostOp::NewConverter)?;
        if from.bytes_per_frame != to.bytes_per_frame {
            return Err(HostError::new(HostOp::NewConverter.name(), ERR_INVALID_PROPERTY));
        }

        Ok(Box::new(NearestFrameConverter::new(
            from,
            to,
            state.failures.get(&HostOp::ConverterQuality).copied(),
            state.failures.get(&HostOp::Convert).copied(),
            Arc::clone(&self.live_converters),
        )))
    }

    fn current_host_time(&self) -> u64 {
        self.state.lock().clock
    }

    fn host_time_to_nanos(&self, host_time: u64) -> u64 {
        let (numer, denom) = self.state.lock().timebase;
        (host_time as u128 * numer as u128 / denom as u128) as u64
    }

    fn add_property_listener(
        &self,
        object: ObjectId,
        address: PropertyAddress,
        listener: Arc<dyn PropertyListener>,
    ) -> HostResult<ListenerId> {
        let mut state = self.state.lock();
        state.check(HostOp::AddListener)?;
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.insert(
            id,
            Listener {
                object,
                address,
                listener,
            },
        );
        Ok(id)
    }

    fn remove_property_listener(&self, id: ListenerId) -> HostResult<()> {
        let mut state = self.state.lock();
        state.check(HostOp::RemoveListener)?;
        state
            .listeners
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| HostError::new(HostOp::RemoveListener.name(), ERR_BAD_HANDLE))
    }

    fn limits_concurrent_streams(&self) -> bool {
        self.state.lock().limits_streams
    }
}

/// Sample rate converter that picks the nearest source frame for every
/// output frame
struct NearestFrameConverter {
    from_rate: f64,
    to_rate: f64,
    bytes_per_frame: usize,
    quality: ConverterQuality,
    quality_failure: Option<i32>,
    convert_failure: Option<i32>,
    live: Arc<AtomicUsize>,
}

impl NearestFrameConverter {
    fn new(
        from: &StreamDescriptor,
        to: &StreamDescriptor,
        quality_failure: Option<i32>,
        convert_failure: Option<i32>,
        live: Arc<AtomicUsize>,
    ) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            from_rate: from.sample_rate,
            to_rate: to.sample_rate,
            bytes_per_frame: to.bytes_per_frame(),
            quality: ConverterQuality::Medium,
            quality_failure,
            convert_failure,
            live,
        }
    }
}

impl FormatConverter for NearestFrameConverter {
    fn set_quality(&mut self, quality: ConverterQuality) -> HostResult<()> {
        if let Some(status) = self.quality_failure {
            return Err(HostError::new(HostOp::ConverterQuality.name(), status));
        }
        self.quality = quality;
        Ok(())
    }

    fn convert(&mut self, input: &[u8], input_frames: u32, output: &mut [u8]) -> HostResult<u32> {
        if let Some(status) = self.convert_failure {
            return Err(HostError::new(HostOp::Convert.name(), status));
        }
        let bpf = self.bytes_per_frame;
        if input_frames == 0 || bpf == 0 {
            return Ok(0);
        }

        let input_frames = (input_frames as usize).min(input.len() / bpf);
        let ratio = self.to_rate / self.from_rate;
        let wanted = (input_frames as f64 * ratio).round() as usize;
        let frames = wanted.min(output.len() / bpf);

        for i in 0..frames {
            let src = ((i as f64 / ratio) as usize).min(input_frames - 1);
            output[i * bpf..(i + 1) * bpf].copy_from_slice(&input[src * bpf..(src + 1) * bpf]);
        }
        Ok(frames as u32)
    }
}

impl Drop for NearestFrameConverter {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_stereo(rate: u32) -> StreamDescriptor {
        StreamDescriptor::from_params(&StreamParams::stereo_float(rate)).unwrap()
    }

    #[test]
    fn test_unit_lifecycle_counts() {
        let host = SimulatedHost::new();
        let unit = host.new_unit().unwrap();
        assert_eq!(host.live_units(), 1);

        assert!(host.start(unit).is_err(), "start requires initialize");
        host.initialize(unit).unwrap();
        host.start(unit).unwrap();
        assert!(host.is_running(unit));

        host.uninitialize(unit).unwrap();
        assert!(!host.is_running(unit));
        host.dispose_unit(unit).unwrap();
        assert_eq!(host.live_units(), 0);
        assert!(host.dispose_unit(unit).is_err());
    }

    #[test]
    fn test_failure_injection() {
        let host = SimulatedHost::new();
        host.fail(HostOp::NewUnit, -1234);

        let err = host.new_unit().unwrap_err();
        assert_eq!(err, HostError::new("new_unit", -1234));

        host.clear_failure(HostOp::NewUnit);
        assert!(host.new_unit().is_ok());
    }

    #[test]
    fn test_hardware_format_follows_bound_device() {
        let host = SimulatedHost::new();
        host.add_device(SimulatedDevice::new(7, 44100.0));
        let unit = host.new_unit().unwrap();

        assert!(host.stream_format(unit, Scope::Input, Bus::Input).is_err());

        host.set_current_device(unit, Bus::Input, DeviceId(7)).unwrap();
        let format = host.stream_format(unit, Scope::Input, Bus::Input).unwrap();
        assert_eq!(format.sample_rate, 44100.0);
        assert_eq!(host.buffer_frame_size(unit, Bus::Input).unwrap(), 512);
    }

    #[test]
    fn test_converter_resamples_and_counts() {
        let host = SimulatedHost::new();
        let from = float_stereo(24000);
        let to = float_stereo(48000);

        let mut converter = host.new_converter(&from, &to).unwrap();
        assert_eq!(host.live_converters(), 1);
        converter.set_quality(ConverterQuality::Max).unwrap();

        let input: Vec<u8> = (0..4u8).flat_map(|f| [f; 8]).collect();
        let mut output = vec![0u8; 8 * 8];
        let frames = converter.convert(&input, 4, &mut output).unwrap();
        assert_eq!(frames, 8);
        assert_eq!(output[0], 0);
        assert_eq!(output[8], 0);
        assert_eq!(output[16], 1);
        assert_eq!(output[63], 3);

        drop(converter);
        assert_eq!(host.live_converters(), 0);
    }

    #[test]
    fn test_output_period_requires_running_unit() {
        struct Silence;
        impl RenderCallback for Silence {
            fn render(&self, _: Bus, _: &HostTimestamp, _: u32, output: Option<&mut [u8]>) {
                if let Some(out) = output {
                    out.fill(0);
                }
            }
        }

        let host = SimulatedHost::new();
        let unit = host.new_unit().unwrap();
        host.set_stream_format(unit, Scope::Input, Bus::Output, &float_stereo(48000))
            .unwrap();
        host.set_render_callback(unit, Bus::Output, Arc::new(Silence))
            .unwrap();
        assert!(host.run_output_period(unit, 16).is_none());

        host.initialize(unit).unwrap();
        host.start(unit).unwrap();
        let rendered = host.run_output_period(unit, 16).unwrap();
        assert_eq!(rendered.len(), 16 * 8);
        assert!(rendered.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_listeners_fire_outside_lock() {
        struct Reentrant(Arc<SimulatedHost>, AtomicUsize);
        impl PropertyListener for Reentrant {
            fn on_properties_changed(&self, _: ObjectId, addresses: &[PropertyAddress]) {
                // Calling back into the host must not deadlock
                let _ = self.0.live_listeners();
                self.1.fetch_add(addresses.len(), Ordering::SeqCst);
            }
        }

        let host = Arc::new(SimulatedHost::new());
        let listener = Arc::new(Reentrant(Arc::clone(&host), AtomicUsize::new(0)));
        let address = PropertyAddress::new(PropertySelector::DefaultOutputDevice, Scope::Global);
        let id = host
            .add_property_listener(ObjectId::System, address, listener.clone())
            .unwrap();

        assert_eq!(
            host.fire_property_changed(ObjectId::System, PropertySelector::DefaultOutputDevice),
            1
        );
        assert_eq!(
            host.fire_property_changed(ObjectId::System, PropertySelector::DataSource),
            0
        );
        assert_eq!(listener.1.load(Ordering::SeqCst), 1);

        host.remove_property_listener(id).unwrap();
        assert_eq!(host.live_listeners(), 0);
    }
}
