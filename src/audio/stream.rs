//! Stream lifecycle and configuration
//!
//! [`Stream::open`] binds host units, negotiates formats, allocates every
//! buffer the realtime path needs and registers the period callback.
//! Control operations (start, stop, position, latency, volume, pan) run on
//! the application thread and share [`StreamInner`] with the callback.
//!
//! Locking: `status` is a reentrant mutex around the mutable counters and
//! flags, held only for field access. `capture` and `render` guard the
//! realtime buffers and the data callback; when both are needed `capture`
//! is taken first. Host render/stop calls and application callbacks never
//! run while `status` is borrowed.

use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::sync::Arc;

use super::buffer::{DuplexRing, RingReader, RingStats, StagingBuffer};
use super::callback::CallbackProxy;
use super::format::{StreamDescriptor, StreamParams};
use super::latency::{HardwareLatency, LatencyTracker};
use super::notify::{DeviceChangeListeners, DeviceChangeRouter};
use crate::config::StreamConfig;
use crate::context::{Context, StreamSlot};
use crate::error::StreamError;
use crate::host::{
    AudioHost, Bus, DeviceId, Direction, FormatConverter, HostResult, Scope, UnitId,
};

/// Per-period data callback.
///
/// Receives captured input frames (if any), the output buffer to fill (if
/// any) and the period frame count. Returns the frames produced or
/// consumed; fewer than requested starts a drain, a negative value is a
/// fatal error.
pub type DataCallback = Box<dyn FnMut(Option<&[u8]>, Option<&mut [u8]>, u32) -> i64 + Send>;

/// Lifecycle notification callback
pub type StateCallback = Box<dyn Fn(StreamState) + Send + Sync>;

/// Invoked when the default device or the bound device's data source changes
pub type DeviceChangedCallback = Arc<dyn Fn() + Send + Sync>;

/// Notifications delivered through the [`StateCallback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Started,
    Stopped,
    /// All produced output was played after a short period
    Drained,
    /// A fatal realtime failure shut the stream down
    Error,
}

/// Observable lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Ready,
    Started,
    Stopped,
    Draining,
    Shutdown,
}

/// How frames move between the host units and the data callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    OutputOnly,
    InputOnly,
    /// One unit for both directions; the output period renders input inline
    SharedInline,
    /// Input periods feed a [`DuplexRing`] that the output period drains
    Buffered,
}

/// Mutable stream fields guarded by the stream mutex
pub(crate) struct StreamStatus {
    pub frames_played: u64,
    pub frames_queued: u64,
    pub latency: LatencyTracker,
    pub shutdown: bool,
    pub draining: bool,
    pub panning: f32,
    pub phase: StreamPhase,
    pub device_changed: Option<DeviceChangedCallback>,
}

/// Host units backing a stream. `input == output` for a shared unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UnitBinding {
    pub output: Option<UnitId>,
    pub input: Option<UnitId>,
}

impl UnitBinding {
    /// The input unit when it is not also the output unit
    pub fn distinct_input(&self) -> Option<UnitId> {
        match (self.input, self.output) {
            (Some(input), Some(output)) if input == output => None,
            (input, _) => input,
        }
    }
}

/// Input-side buffers touched only by the realtime thread after open
pub(crate) struct CaptureSide {
    /// Frames rendered from the hardware at its native rate
    pub staging: StagingBuffer,
    pub converter: Option<Box<dyn FormatConverter>>,
    /// Converter output at the requested rate
    pub converted: Option<StagingBuffer>,
}

pub(crate) struct RenderSide {
    pub data_callback: DataCallback,
    /// Input frames pulled from the duplex ring for one output period
    pub duplex_input: Option<(StagingBuffer, RingReader)>,
}

pub(crate) struct StreamInner {
    pub host: Arc<dyn AudioHost>,
    pub routing: Routing,
    pub units: UnitBinding,
    pub output_device: Option<DeviceId>,
    pub output_format: Option<StreamDescriptor>,
    /// Requested input format
    pub input_format: Option<StreamDescriptor>,
    /// Input format at the hardware rate, as staged
    pub input_hw_format: Option<StreamDescriptor>,
    /// Captured input passes through a rate converter
    pub has_converter: bool,
    pub status: ReentrantMutex<RefCell<StreamStatus>>,
    /// Realtime side only. Held across the data callback, so no control
    /// method may lock it; teardown takes it after shutdown is set.
    pub capture: Mutex<Option<CaptureSide>>,
    /// Realtime side only, same rule as `capture`
    pub render: Mutex<RenderSide>,
    pub ring: Option<DuplexRing>,
    pub state_callback: StateCallback,
    listeners: Mutex<Option<DeviceChangeListeners>>,
    slot: Mutex<Option<StreamSlot>>,
}

impl StreamInner {
    /// Run `f` with the stream fields borrowed. Must not be nested.
    pub fn with_status<R>(&self, f: impl FnOnce(&mut StreamStatus) -> R) -> R {
        let guard = self.status.lock();
        let mut status = guard.borrow_mut();
        f(&mut status)
    }

    /// Sample rate used for latency conversion
    pub fn latency_rate(&self) -> f64 {
        self.output_format
            .or(self.input_format)
            .map(|f| f.sample_rate)
            .unwrap_or(0.0)
    }

    pub fn notify(&self, state: StreamState) {
        (self.state_callback)(state);
    }

    /// Invoke the device-changed callback serialized with other stream
    /// state access. The stream mutex stays held during the call but no
    /// field borrow is active, so the callback may query the stream.
    pub fn notify_device_changed(&self) {
        let guard = self.status.lock();
        let callback = {
            let status = guard.borrow();
            if status.shutdown {
                None
            } else {
                status.device_changed.clone()
            }
        };
        if let Some(callback) = callback {
            callback();
        }
        drop(guard);
    }

    /// Idempotent teardown: mark shutdown, stop and release host units and
    /// buffers, remove listeners, free the context slot
    fn teardown(&self) {
        let Some(slot) = self.slot.lock().take() else {
            return;
        };

        self.with_status(|s| {
            s.shutdown = true;
            s.draining = false;
            s.phase = StreamPhase::Shutdown;
        });

        if let Some(unit) = self.units.distinct_input() {
            release_unit(self.host.as_ref(), unit);
        }
        *self.capture.lock() = None;

        if let Some(unit) = self.units.output {
            release_unit(self.host.as_ref(), unit);
        }
        {
            let mut render = self.render.lock();
            if let (Some((_, mut reader)), Some(ring)) =
                (render.duplex_input.take(), self.ring.as_ref())
            {
                reader.release(ring);
            }
        }

        if let Some(listeners) = self.listeners.lock().take() {
            listeners.uninstall(self.host.as_ref());
        }

        drop(slot);
        tracing::info!("Stream destroyed ({:?})", self.routing);
    }
}

fn release_unit(host: &dyn AudioHost, unit: UnitId) {
    if let Err(e) = host.stop(unit) {
        tracing::warn!("Stopping unit {:?} during teardown: {}", unit, e);
    }
    if let Err(e) = host.uninitialize(unit) {
        tracing::warn!("Uninitializing unit {:?}: {}", unit, e);
    }
    if let Err(e) = host.dispose_unit(unit) {
        tracing::warn!("Disposing unit {:?}: {}", unit, e);
    }
}

/// Units created during open, released again unless open succeeds
struct UnitSet<'a> {
    host: &'a dyn AudioHost,
    created: Vec<UnitId>,
    initialized: Vec<UnitId>,
    armed: bool,
}

impl<'a> UnitSet<'a> {
    fn new(host: &'a dyn AudioHost) -> Self {
        Self {
            host,
            created: Vec::new(),
            initialized: Vec::new(),
            armed: true,
        }
    }

    fn create(&mut self) -> HostResult<UnitId> {
        let unit = self.host.new_unit()?;
        self.created.push(unit);
        Ok(unit)
    }

    fn initialize(&mut self, unit: UnitId) -> HostResult<()> {
        self.host.initialize(unit)?;
        self.initialized.push(unit);
        Ok(())
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for UnitSet<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for unit in self.initialized.drain(..) {
            let _ = self.host.uninitialize(unit);
        }
        for unit in self.created.drain(..) {
            let _ = self.host.dispose_unit(unit);
        }
    }
}

/// Result of input bus negotiation
struct InputNegotiation {
    hw_format: StreamDescriptor,
    frames_per_buffer: u32,
    converter: Option<Box<dyn FormatConverter>>,
}

/// Configure the input bus of `unit` for `requested`.
///
/// The bus delivers the requested layout at the hardware's native rate; a
/// converter bridges the rates when they differ.
fn negotiate_input(
    host: &dyn AudioHost,
    unit: UnitId,
    requested: &StreamDescriptor,
    config: &StreamConfig,
) -> Result<InputNegotiation, StreamError> {
    let frames_per_buffer = host.buffer_frame_size(unit, Bus::Input)?;
    let hardware = host.stream_format(unit, Scope::Input, Bus::Input)?;
    let hw_format = requested.with_sample_rate(hardware.sample_rate);

    host.set_stream_format(unit, Scope::Output, Bus::Input, &hw_format)?;
    host.set_max_frames_per_slice(unit, frames_per_buffer)?;

    let converter = if hardware.sample_rate != requested.sample_rate {
        tracing::debug!(
            "Input rate {} Hz differs from requested {} Hz, converting",
            hardware.sample_rate,
            requested.sample_rate
        );
        let mut converter = host
            .new_converter(&hw_format, requested)
            .map_err(StreamError::ConversionSetupFailed)?;
        converter
            .set_quality(config.converter_quality)
            .map_err(StreamError::ConversionSetupFailed)?;
        Some(converter)
    } else {
        None
    };

    Ok(InputNegotiation {
        hw_format,
        frames_per_buffer,
        converter,
    })
}

/// Frames a converter may emit for `frames` input frames
fn converted_capacity(frames: u32, from_rate: f64, to_rate: f64) -> usize {
    (frames as f64 * to_rate / from_rate).ceil() as usize + 1
}

/// Shrink the host buffer towards `latency_ms`. Only ever lowers the
/// current size, and stays within the device's supported range.
fn apply_latency_hint(
    host: &dyn AudioHost,
    unit: UnitId,
    bus: Bus,
    device: DeviceId,
    rate: f64,
    latency_ms: u32,
) -> Result<(), StreamError> {
    let (min, max) = host.buffer_frame_size_range(device)?;
    let wanted = (latency_ms as f64 * rate / 1000.0).clamp(min, max) as u32;
    let current = host.buffer_frame_size(unit, bus)?;

    if wanted < current {
        tracing::debug!("Reducing host buffer from {} to {} frames", current, wanted);
        host.set_buffer_frame_size(unit, bus, wanted)?;
    }
    Ok(())
}

/// An open audio stream
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl Stream {
    /// Open a stream.
    ///
    /// At least one of `input` and `output` must be given. `latency_ms` is
    /// only applied when the context's config enables the latency hint.
    /// Every host resource acquired before a failure is released again.
    pub fn open(
        context: &Context,
        input: Option<StreamParams>,
        output: Option<StreamParams>,
        latency_ms: u32,
        data_callback: DataCallback,
        state_callback: StateCallback,
    ) -> Result<Self, StreamError> {
        if input.is_none() && output.is_none() {
            return Err(StreamError::InvalidParameter(
                "a stream needs an input or an output".to_string(),
            ));
        }

        let slot = context.acquire_slot()?;
        let host = Arc::clone(context.host());
        let config = &context.config().stream;

        let input_format = input.as_ref().map(StreamDescriptor::from_params).transpose()?;
        let output_format = output.as_ref().map(StreamDescriptor::from_params).transpose()?;

        let output_device = match output_format {
            Some(_) => Some(host.default_device(Direction::Output)?),
            None => None,
        };
        let input_device = match input_format {
            Some(_) => Some(host.default_device(Direction::Input)?),
            None => None,
        };

        let mut guard = UnitSet::new(host.as_ref());
        let shared = output_device.is_some() && output_device == input_device;

        let output_unit = match output_device {
            Some(device) => {
                let unit = guard.create()?;
                host.enable_io(unit, Bus::Input, shared)?;
                host.enable_io(unit, Bus::Output, true)?;
                host.set_current_device(unit, Bus::Output, device)?;
                Some(unit)
            }
            None => None,
        };
        let input_unit = match input_device {
            Some(device) if shared => {
                let unit = output_unit.ok_or_else(|| {
                    StreamError::InvalidParameter("shared unit missing".to_string())
                })?;
                host.set_current_device(unit, Bus::Input, device)?;
                Some(unit)
            }
            Some(device) => {
                let unit = guard.create()?;
                host.enable_io(unit, Bus::Input, true)?;
                host.enable_io(unit, Bus::Output, false)?;
                host.set_current_device(unit, Bus::Input, device)?;
                Some(unit)
            }
            None => None,
        };
        let units = UnitBinding {
            output: output_unit,
            input: input_unit,
        };

        let negotiated = match (input_unit, input_format.as_ref()) {
            (Some(unit), Some(requested)) => {
                Some(negotiate_input(host.as_ref(), unit, requested, config)?)
            }
            _ => None,
        };

        if let (Some(unit), Some(format)) = (output_unit, output_format.as_ref()) {
            host.set_stream_format(unit, Scope::Input, Bus::Output, format)?;
        }

        if config.apply_latency_hint {
            let target = match (output_unit, output_device, output_format, input_unit, input_device) {
                (Some(unit), Some(device), Some(format), _, _) => {
                    Some((unit, Bus::Output, device, format.sample_rate))
                }
                (_, _, _, Some(unit), Some(device)) => Some((
                    unit,
                    Bus::Input,
                    device,
                    input_format.map(|f| f.sample_rate).unwrap_or(0.0),
                )),
                _ => None,
            };
            if let Some((unit, bus, device, rate)) = target {
                apply_latency_hint(host.as_ref(), unit, bus, device, rate, latency_ms)?;
            }
        }

        let has_converter = negotiated.as_ref().is_some_and(|n| n.converter.is_some());
        let routing = match (output_unit, input_unit) {
            (Some(_), None) => Routing::OutputOnly,
            (None, _) => Routing::InputOnly,
            (Some(_), Some(_)) if shared && !has_converter => Routing::SharedInline,
            (Some(_), Some(_)) => Routing::Buffered,
        };

        // Realtime buffers
        let input_hw_format = negotiated.as_ref().map(|n| n.hw_format);
        let mut ring = None;
        let mut duplex_input = None;
        let capture = match (negotiated, input_format) {
            (Some(negotiated), Some(requested)) => {
                let fpb = negotiated.frames_per_buffer;
                let staging = StagingBuffer::new(&negotiated.hw_format, fpb);
                let block_frames = match negotiated.converter {
                    Some(_) => converted_capacity(
                        fpb,
                        negotiated.hw_format.sample_rate,
                        requested.sample_rate,
                    ),
                    None => fpb as usize,
                };
                let converted = negotiated
                    .converter
                    .as_ref()
                    .map(|_| StagingBuffer::with_frame_size(requested.bytes_per_frame(), block_frames));

                if routing == Routing::Buffered {
                    ring = Some(DuplexRing::new(
                        requested.bytes_per_frame(),
                        block_frames,
                        config.duplex_ring_periods,
                    ));
                    let output_frames = match output_unit {
                        Some(unit) => host.buffer_frame_size(unit, Bus::Output)?,
                        None => fpb,
                    };
                    duplex_input = Some((
                        StagingBuffer::new(&requested, output_frames),
                        RingReader::new(),
                    ));
                }

                Some(CaptureSide {
                    staging,
                    converter: negotiated.converter,
                    converted,
                })
            }
            _ => None,
        };

        let inner = Arc::new(StreamInner {
            host: Arc::clone(&host),
            routing,
            units,
            output_device,
            output_format,
            input_format,
            input_hw_format,
            has_converter,
            status: ReentrantMutex::new(RefCell::new(StreamStatus {
                frames_played: 0,
                frames_queued: 0,
                latency: LatencyTracker::default(),
                shutdown: false,
                draining: false,
                panning: 0.0,
                phase: StreamPhase::Ready,
                device_changed: None,
            })),
            capture: Mutex::new(capture),
            render: Mutex::new(RenderSide {
                data_callback,
                duplex_input,
            }),
            ring,
            state_callback,
            listeners: Mutex::new(None),
            slot: Mutex::new(Some(slot)),
        });

        let proxy = Arc::new(CallbackProxy::new(Arc::downgrade(&inner)));
        if let Some(unit) = output_unit {
            host.set_render_callback(unit, Bus::Output, proxy.clone())?;
        }
        if let Some(unit) = input_unit {
            if matches!(routing, Routing::InputOnly | Routing::Buffered) {
                host.set_render_callback(unit, Bus::Input, proxy)?;
            }
        }

        if let Some(unit) = output_unit {
            guard.initialize(unit)?;
        }
        if let Some(unit) = units.distinct_input() {
            guard.initialize(unit)?;
        }

        // Change detection is best effort; the stream works without it
        let watched = output_device
            .map(|d| (d, Direction::Output))
            .or(input_device.map(|d| (d, Direction::Input)));
        if let Some((device, direction)) = watched {
            let router = Arc::new(DeviceChangeRouter::new(Arc::downgrade(&inner)));
            match DeviceChangeListeners::install(host.as_ref(), device, direction, router) {
                Ok(listeners) => *inner.listeners.lock() = Some(listeners),
                Err(e) => tracing::warn!("Device change notifications unavailable: {}", e),
            }
        }

        guard.disarm();

        tracing::info!(
            "Stream opened: {:?}, input {:?}, output {:?}",
            routing,
            input,
            output
        );
        Ok(Self { inner })
    }

    fn ensure_live(&self) -> Result<(), StreamError> {
        if self.inner.with_status(|s| s.shutdown) {
            Err(StreamError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Start input then output, and report `Started`
    pub fn start(&self) -> Result<(), StreamError> {
        self.ensure_live()?;
        self.inner.with_status(|s| s.draining = false);

        let host = self.inner.host.as_ref();
        if let Some(unit) = self.inner.units.distinct_input() {
            host.start(unit)?;
        }
        if let Some(unit) = self.inner.units.output {
            host.start(unit)?;
        }

        self.inner.with_status(|s| {
            if !s.shutdown {
                s.phase = StreamPhase::Started;
            }
        });
        self.inner.notify(StreamState::Started);
        tracing::info!("Stream started");
        Ok(())
    }

    /// Stop output then input, and report `Stopped`
    pub fn stop(&self) -> Result<(), StreamError> {
        self.ensure_live()?;

        let host = self.inner.host.as_ref();
        if let Some(unit) = self.inner.units.output {
            host.stop(unit)?;
        }
        if let Some(unit) = self.inner.units.distinct_input() {
            host.stop(unit)?;
        }

        self.inner.with_status(|s| {
            if !s.shutdown {
                s.phase = StreamPhase::Stopped;
            }
        });
        self.inner.notify(StreamState::Stopped);
        tracing::info!("Stream stopped");
        Ok(())
    }

    /// Frames handed to the hardware so far
    pub fn position(&self) -> u64 {
        self.inner.with_status(|s| s.frames_played)
    }

    /// Frames produced by the data callback so far
    pub fn frames_queued(&self) -> u64 {
        self.inner.with_status(|s| s.frames_queued)
    }

    /// Output latency in frames: cached hardware latency plus the latency
    /// observed in the last period
    pub fn latency(&self) -> Result<u32, StreamError> {
        let inner = &self.inner;
        let (Some(unit), Some(device), Some(format)) =
            (inner.units.output, inner.output_device, inner.output_format)
        else {
            return Err(StreamError::InvalidParameter(
                "latency is only defined for output streams".to_string(),
            ));
        };

        if let Some(total) = inner.with_status(|s| s.latency.total()) {
            return Ok(total);
        }

        let hardware = HardwareLatency::query(inner.host.as_ref(), unit, device)?
            .frames(format.sample_rate);
        Ok(inner.with_status(|s| {
            s.latency.cache_hardware(hardware);
            s.latency.total().unwrap_or(hardware)
        }))
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), StreamError> {
        let Some(unit) = self.inner.units.output else {
            return Err(StreamError::InvalidParameter(
                "volume requires an output".to_string(),
            ));
        };
        self.inner.host.set_volume(unit, volume)?;
        Ok(())
    }

    /// Set the stereo pan in [-1, 1]. Applied to 2-channel output only.
    pub fn set_panning(&self, panning: f32) -> Result<(), StreamError> {
        let Some(format) = self.inner.output_format else {
            return Err(StreamError::InvalidParameter(
                "panning requires an output".to_string(),
            ));
        };
        if format.channels() > 2 {
            return Err(StreamError::InvalidParameter(format!(
                "panning is not supported for {} channels",
                format.channels()
            )));
        }
        if !(-1.0..=1.0).contains(&panning) {
            return Err(StreamError::InvalidParameter(format!(
                "pan {} outside [-1, 1]",
                panning
            )));
        }

        self.inner.with_status(|s| s.panning = panning);
        Ok(())
    }

    pub fn panning(&self) -> f32 {
        self.inner.with_status(|s| s.panning)
    }

    /// Set or clear the device-changed callback
    pub fn register_device_changed_callback(&self, callback: Option<DeviceChangedCallback>) {
        self.inner.with_status(|s| s.device_changed = callback);
    }

    pub fn phase(&self) -> StreamPhase {
        self.inner.with_status(|s| s.phase)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.with_status(|s| s.draining)
    }

    pub fn routing(&self) -> Routing {
        self.inner.routing
    }

    pub fn output_format(&self) -> Option<StreamDescriptor> {
        self.inner.output_format
    }

    /// Requested input format, as delivered to the data callback
    pub fn input_format(&self) -> Option<StreamDescriptor> {
        self.inner.input_format
    }

    /// Input format at the hardware rate, as rendered by the host
    pub fn input_hardware_format(&self) -> Option<StreamDescriptor> {
        self.inner.input_hw_format
    }

    pub fn output_unit(&self) -> Option<UnitId> {
        self.inner.units.output
    }

    pub fn input_unit(&self) -> Option<UnitId> {
        self.inner.units.input
    }

    /// Whether captured input is rate converted. Safe to call from the
    /// data callback.
    pub fn has_input_converter(&self) -> bool {
        self.inner.has_converter
    }

    /// Duplex ring counters for buffered duplex streams
    pub fn duplex_stats(&self) -> Option<RingStats> {
        self.inner.ring.as_ref().map(DuplexRing::stats)
    }

    /// Tear the stream down and release its context slot
    pub fn destroy(self) {
        // Drop runs the teardown
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}
