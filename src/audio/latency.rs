//! Output latency accounting
//!
//! Two components make up the latency a caller observes: a per-period
//! scheduling latency derived from the host's presentation timestamp, and a
//! fixed hardware latency queried once and cached.

use crate::constants::NANOS_PER_SECOND;
use crate::host::{AudioHost, DeviceId, Direction, HostResult, HostTimestamp, UnitId};

/// Frames between now and the presentation time carried by `timestamp`.
///
/// Zero when the timestamp has no valid host time. Negative when the
/// presentation time is already in the past.
pub fn frames_from_timestamp(host: &dyn AudioHost, timestamp: &HostTimestamp, rate: f64) -> i64 {
    if !timestamp.host_time_valid {
        return 0;
    }

    let presentation_ns = host.host_time_to_nanos(timestamp.host_time) as i64;
    let now_ns = host.host_time_to_nanos(host.current_host_time()) as i64;
    ((presentation_ns - now_ns) as f64 * rate / NANOS_PER_SECOND) as i64
}

/// Hardware latency components of the bound output path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardwareLatency {
    /// Algorithmic latency of the unit itself
    pub unit_seconds: f64,
    pub device_frames: u32,
    pub safety_offset: u32,
}

impl HardwareLatency {
    /// Query all three components. Any failing query fails the whole lookup.
    pub fn query(host: &dyn AudioHost, unit: UnitId, device: DeviceId) -> HostResult<Self> {
        Ok(Self {
            unit_seconds: host.unit_latency_seconds(unit)?,
            device_frames: host.device_latency_frames(device, Direction::Output)?,
            safety_offset: host.device_safety_offset(device, Direction::Output)?,
        })
    }

    /// Total in frames at `rate`
    pub fn frames(&self, rate: f64) -> u32 {
        let unit_frames = (self.unit_seconds * rate).max(0.0) as u32;
        unit_frames
            .saturating_add(self.device_frames)
            .saturating_add(self.safety_offset)
    }
}

/// Latency state kept under the stream lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyTracker {
    /// Most recent per-period latency
    pub current: i64,
    /// Cached hardware latency, absent until first queried
    pub hardware: Option<u32>,
}

impl LatencyTracker {
    pub fn update(&mut self, frames: i64) {
        self.current = frames;
    }

    /// Cache `hardware` unless a value is already present, returning the
    /// cached value
    pub fn cache_hardware(&mut self, hardware: u32) -> u32 {
        *self.hardware.get_or_insert(hardware)
    }

    /// Hardware latency plus the last per-period latency, clamped to `u32`
    pub fn total(&self) -> Option<u32> {
        self.hardware.map(|hw| {
            (hw as i64 + self.current).clamp(0, u32::MAX as i64) as u32
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SimulatedHost;

    #[test]
    fn test_invalid_timestamp_is_zero() {
        let host = SimulatedHost::new();
        let ts = HostTimestamp {
            host_time: host.current_host_time() + 1_000_000,
            host_time_valid: false,
            sample_time: 0.0,
        };
        assert_eq!(frames_from_timestamp(&host, &ts, 48000.0), 0);
    }

    #[test]
    fn test_future_presentation_is_positive() {
        let host = SimulatedHost::new();
        // 1:1 timebase, presentation 10ms ahead
        let ts = HostTimestamp {
            host_time: host.current_host_time() + 10_000_000,
            host_time_valid: true,
            sample_time: 0.0,
        };
        let frames = frames_from_timestamp(&host, &ts, 48000.0);
        assert_eq!(frames, 480);
    }

    #[test]
    fn test_past_presentation_is_negative() {
        let host = SimulatedHost::new();
        host.advance_clock(20_000_000);
        let ts = HostTimestamp {
            host_time: host.current_host_time() - 5_000_000,
            host_time_valid: true,
            sample_time: 0.0,
        };
        assert_eq!(frames_from_timestamp(&host, &ts, 48000.0), -240);
    }

    #[test]
    fn test_timebase_is_applied() {
        let host = SimulatedHost::new();
        host.set_timebase(125, 3);
        // 3 ticks = 125ns, so 240_000 ticks = 10ms
        let ts = HostTimestamp {
            host_time: host.current_host_time() + 240_000,
            host_time_valid: true,
            sample_time: 0.0,
        };
        assert_eq!(frames_from_timestamp(&host, &ts, 44100.0), 441);
    }

    #[test]
    fn test_hardware_frames() {
        let hw = HardwareLatency {
            unit_seconds: 0.0015,
            device_frames: 12,
            safety_offset: 30,
        };
        assert_eq!(hw.frames(48000.0), 72 + 12 + 30);
    }

    #[test]
    fn test_tracker_total() {
        let mut tracker = LatencyTracker::default();
        assert_eq!(tracker.total(), None);

        assert_eq!(tracker.cache_hardware(100), 100);
        // Already cached, keeps the first value
        assert_eq!(tracker.cache_hardware(7), 100);

        tracker.update(25);
        assert_eq!(tracker.total(), Some(125));

        tracker.update(-500);
        assert_eq!(tracker.total(), Some(0));
    }
}
