//! Host audio subsystem interface
//!
//! The engine talks to the platform audio service only through
//! [`AudioHost`]. Units are the host's I/O endpoints: each has an output bus
//! (element 0) that pulls rendered frames from the engine and an input bus
//! (element 1) that delivers captured frames. Every fallible call returns a
//! [`HostError`] carrying the raw host status.

pub mod simulated;

pub use simulated::{HostOp, SimulatedDevice, SimulatedHost, OUTPUT_SENTINEL};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::format::StreamDescriptor;
use crate::error::HostError;

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Opaque handle to a host I/O unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(pub u64);

/// Opaque handle to a hardware device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

/// Unit element carrying one direction of audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    /// Element 0, frames flowing to the hardware
    Output,
    /// Element 1, frames flowing from the hardware
    Input,
}

impl Bus {
    pub fn element(self) -> u32 {
        match self {
            Bus::Output => 0,
            Bus::Input => 1,
        }
    }
}

/// Property scope on a unit bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

/// Timing information the host passes with every period
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostTimestamp {
    /// Host clock ticks at which this period is presented
    pub host_time: u64,
    /// Whether `host_time` carries a meaningful value
    pub host_time_valid: bool,
    pub sample_time: f64,
}

/// Target of a property listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectId {
    System,
    Device(DeviceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertySelector {
    DefaultOutputDevice,
    DefaultInputDevice,
    DataSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyAddress {
    pub selector: PropertySelector,
    pub scope: Scope,
}

impl PropertyAddress {
    pub fn new(selector: PropertySelector, scope: Scope) -> Self {
        Self { selector, scope }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Sample rate converter quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterQuality {
    Min,
    Low,
    Medium,
    High,
    Max,
}

/// Entry point the host invokes once per hardware period.
///
/// For [`Bus::Output`] `output` is the buffer to fill; for [`Bus::Input`]
/// it is `None` and captured frames are fetched with
/// [`AudioHost::render_input`]. Called on the host's realtime thread.
pub trait RenderCallback: Send + Sync {
    fn render(&self, bus: Bus, timestamp: &HostTimestamp, frames: u32, output: Option<&mut [u8]>);
}

/// Receives property-change notifications on an unspecified host thread
pub trait PropertyListener: Send + Sync {
    fn on_properties_changed(&self, object: ObjectId, addresses: &[PropertyAddress]);
}

/// Sample rate converter created by the host
pub trait FormatConverter: Send {
    fn set_quality(&mut self, quality: ConverterQuality) -> HostResult<()>;

    /// Convert `input_frames` frames from `input` into `output`, returning the
    /// number of frames written
    fn convert(&mut self, input: &[u8], input_frames: u32, output: &mut [u8]) -> HostResult<u32>;
}

/// Capability set consumed from the host audio subsystem
pub trait AudioHost: Send + Sync {
    // Units
    fn new_unit(&self) -> HostResult<UnitId>;
    fn dispose_unit(&self, unit: UnitId) -> HostResult<()>;
    fn enable_io(&self, unit: UnitId, bus: Bus, enable: bool) -> HostResult<()>;
    fn default_device(&self, direction: Direction) -> HostResult<DeviceId>;
    fn set_current_device(&self, unit: UnitId, bus: Bus, device: DeviceId) -> HostResult<()>;

    // Formats and buffering
    fn stream_format(&self, unit: UnitId, scope: Scope, bus: Bus) -> HostResult<StreamDescriptor>;
    fn set_stream_format(
        &self,
        unit: UnitId,
        scope: Scope,
        bus: Bus,
        format: &StreamDescriptor,
    ) -> HostResult<()>;
    fn buffer_frame_size(&self, unit: UnitId, bus: Bus) -> HostResult<u32>;
    fn set_buffer_frame_size(&self, unit: UnitId, bus: Bus, frames: u32) -> HostResult<()>;
    fn buffer_frame_size_range(&self, device: DeviceId) -> HostResult<(f64, f64)>;
    fn set_max_frames_per_slice(&self, unit: UnitId, frames: u32) -> HostResult<()>;

    // Realtime registration and control
    fn set_render_callback(
        &self,
        unit: UnitId,
        bus: Bus,
        callback: Arc<dyn RenderCallback>,
    ) -> HostResult<()>;
    fn initialize(&self, unit: UnitId) -> HostResult<()>;
    fn uninitialize(&self, unit: UnitId) -> HostResult<()>;
    fn start(&self, unit: UnitId) -> HostResult<()>;
    fn stop(&self, unit: UnitId) -> HostResult<()>;

    /// Render `frames` captured frames from the input bus into `dest`
    fn render_input(
        &self,
        unit: UnitId,
        timestamp: &HostTimestamp,
        frames: u32,
        dest: &mut [u8],
    ) -> HostResult<()>;

    fn set_volume(&self, unit: UnitId, gain: f32) -> HostResult<()>;

    // Latency properties
    fn unit_latency_seconds(&self, unit: UnitId) -> HostResult<f64>;
    fn device_latency_frames(&self, device: DeviceId, direction: Direction) -> HostResult<u32>;
    fn device_safety_offset(&self, device: DeviceId, direction: Direction) -> HostResult<u32>;

    fn new_converter(
        &self,
        from: &StreamDescriptor,
        to: &StreamDescriptor,
    ) -> HostResult<Box<dyn FormatConverter>>;

    // Clock
    fn current_host_time(&self) -> u64;
    fn host_time_to_nanos(&self, host_time: u64) -> u64;

    // Property notifications
    fn add_property_listener(
        &self,
        object: ObjectId,
        address: PropertyAddress,
        listener: Arc<dyn PropertyListener>,
    ) -> HostResult<ListenerId>;
    fn remove_property_listener(&self, id: ListenerId) -> HostResult<()>;

    /// Whether this host version only supports a bounded number of streams
    fn limits_concurrent_streams(&self) -> bool;
}
