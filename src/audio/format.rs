//! Sample formats and the hardware stream descriptor derived from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, MAX_CHANNELS};
use crate::error::StreamError;

/// Sample encodings an application may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit integer, little endian
    #[serde(rename = "s16le")]
    S16LE,
    /// Signed 16-bit integer, big endian
    #[serde(rename = "s16be")]
    S16BE,
    /// 32-bit float, little endian
    #[serde(rename = "f32le")]
    Float32LE,
    /// 32-bit float, big endian
    #[serde(rename = "f32be")]
    Float32BE,
}

impl SampleFormat {
    #[cfg(target_endian = "little")]
    pub const S16NE: Self = Self::S16LE;
    #[cfg(target_endian = "big")]
    pub const S16NE: Self = Self::S16BE;
    #[cfg(target_endian = "little")]
    pub const FLOAT32NE: Self = Self::Float32LE;
    #[cfg(target_endian = "big")]
    pub const FLOAT32NE: Self = Self::Float32BE;

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32LE | Self::Float32BE)
    }

    pub fn is_big_endian(self) -> bool {
        matches!(self, Self::S16BE | Self::Float32BE)
    }

    pub fn bits_per_sample(self) -> u32 {
        match self {
            Self::S16LE | Self::S16BE => 16,
            Self::Float32LE | Self::Float32BE => 32,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bits_per_sample() as usize / 8
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16LE => "s16le",
            Self::S16BE => "s16be",
            Self::Float32LE => "f32le",
            Self::Float32BE => "f32be",
        };
        f.write_str(name)
    }
}

impl FromStr for SampleFormat {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s16le" => Ok(Self::S16LE),
            "s16be" => Ok(Self::S16BE),
            "s16ne" | "s16" => Ok(Self::S16NE),
            "f32le" | "float32le" => Ok(Self::Float32LE),
            "f32be" | "float32be" => Ok(Self::Float32BE),
            "f32ne" | "f32" | "float32" => Ok(Self::FLOAT32NE),
            other => Err(StreamError::InvalidFormat(format!(
                "unsupported sample encoding '{}'",
                other
            ))),
        }
    }
}

/// Format requested by the application for one direction of a stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u32,
}

impl StreamParams {
    pub fn new(format: SampleFormat, rate: u32, channels: u32) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    /// Stereo 32-bit float at the given rate
    pub fn stereo_float(rate: u32) -> Self {
        Self::new(SampleFormat::FLOAT32NE, rate, 2)
    }
}

impl Default for StreamParams {
    /// Native-endian float at the engine's default rate and channel count
    fn default() -> Self {
        Self::new(SampleFormat::FLOAT32NE, DEFAULT_SAMPLE_RATE, DEFAULT_CHANNELS)
    }
}

/// Linear PCM flags carried by a [`StreamDescriptor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FormatFlags {
    pub is_float: bool,
    pub is_signed_integer: bool,
    pub is_big_endian: bool,
    pub is_packed: bool,
}

/// Hardware-compatible description of one direction of a stream.
///
/// Immutable once a stream is configured. The input direction may carry a
/// sample rate that differs from the application's request when it mirrors
/// the hardware's native rate; see [`StreamDescriptor::with_sample_rate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDescriptor {
    pub sample_rate: f64,
    pub format: SampleFormat,
    pub flags: FormatFlags,
    pub bits_per_channel: u32,
    pub channels_per_frame: u32,
    pub bytes_per_frame: u32,
    pub frames_per_packet: u32,
    pub bytes_per_packet: u32,
}

impl StreamDescriptor {
    /// Derive the descriptor for an application request
    pub fn from_params(params: &StreamParams) -> Result<Self, StreamError> {
        if params.rate == 0 {
            return Err(StreamError::InvalidFormat(
                "sample rate must be non-zero".to_string(),
            ));
        }
        if params.channels == 0 || params.channels > MAX_CHANNELS {
            return Err(StreamError::InvalidFormat(format!(
                "unsupported channel count {} (1..={})",
                params.channels, MAX_CHANNELS
            )));
        }

        let format = params.format;
        let flags = FormatFlags {
            is_float: format.is_float(),
            is_signed_integer: !format.is_float(),
            is_big_endian: format.is_big_endian(),
            is_packed: true,
        };
        let bits_per_channel = format.bits_per_sample();
        let bytes_per_frame = (bits_per_channel / 8) * params.channels;
        let frames_per_packet = 1;

        Ok(Self {
            sample_rate: params.rate as f64,
            format,
            flags,
            bits_per_channel,
            channels_per_frame: params.channels,
            bytes_per_frame,
            frames_per_packet,
            bytes_per_packet: bytes_per_frame * frames_per_packet,
        })
    }

    /// Same layout at a different sample rate
    pub fn with_sample_rate(&self, sample_rate: f64) -> Self {
        Self {
            sample_rate,
            ..*self
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame as usize
    }

    pub fn channels(&self) -> u32 {
        self.channels_per_frame
    }

    /// Bytes needed to hold `frames` frames
    pub fn frames_to_bytes(&self, frames: u32) -> usize {
        frames as usize * self.bytes_per_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_stereo_descriptor() {
        let desc = StreamDescriptor::from_params(&StreamParams::new(
            SampleFormat::Float32LE,
            48000,
            2,
        ))
        .unwrap();

        assert_eq!(desc.sample_rate, 48000.0);
        assert_eq!(desc.bits_per_channel, 32);
        assert_eq!(desc.bytes_per_frame, 8);
        assert_eq!(desc.bytes_per_packet, 8);
        assert_eq!(desc.frames_per_packet, 1);
        assert!(desc.flags.is_float);
        assert!(!desc.flags.is_signed_integer);
        assert!(!desc.flags.is_big_endian);
        assert!(desc.flags.is_packed);
    }

    #[test]
    fn test_s16_big_endian_mono() {
        let desc =
            StreamDescriptor::from_params(&StreamParams::new(SampleFormat::S16BE, 44100, 1))
                .unwrap();

        assert_eq!(desc.bits_per_channel, 16);
        assert_eq!(desc.bytes_per_frame, 2);
        assert!(desc.flags.is_signed_integer);
        assert!(desc.flags.is_big_endian);
        assert_eq!(desc.frames_to_bytes(480), 960);
    }

    #[test]
    fn test_rejects_degenerate_requests() {
        let zero_channels = StreamParams::new(SampleFormat::S16LE, 48000, 0);
        assert!(matches!(
            StreamDescriptor::from_params(&zero_channels),
            Err(StreamError::InvalidFormat(_))
        ));

        let zero_rate = StreamParams::new(SampleFormat::S16LE, 0, 2);
        assert!(matches!(
            StreamDescriptor::from_params(&zero_rate),
            Err(StreamError::InvalidFormat(_))
        ));

        let too_wide = StreamParams::new(SampleFormat::S16LE, 48000, MAX_CHANNELS + 1);
        assert!(StreamDescriptor::from_params(&too_wide).is_err());
    }

    #[test]
    fn test_parse_format_names() {
        assert_eq!("s16be".parse::<SampleFormat>().unwrap(), SampleFormat::S16BE);
        assert_eq!("F32LE".parse::<SampleFormat>().unwrap(), SampleFormat::Float32LE);
        assert_eq!("f32".parse::<SampleFormat>().unwrap(), SampleFormat::FLOAT32NE);
        assert!(matches!(
            "u8".parse::<SampleFormat>(),
            Err(StreamError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_default_params() {
        let params = StreamParams::default();
        assert_eq!(params, StreamParams::stereo_float(DEFAULT_SAMPLE_RATE));
        let desc = StreamDescriptor::from_params(&params).unwrap();
        assert_eq!(desc.channels(), DEFAULT_CHANNELS);
        assert_eq!(desc.frames_to_bytes(480), 480 * 8);
    }

    #[test]
    fn test_with_sample_rate_keeps_layout() {
        let desc = StreamDescriptor::from_params(&StreamParams::stereo_float(48000)).unwrap();
        let hw = desc.with_sample_rate(44100.0);
        assert_eq!(hw.sample_rate, 44100.0);
        assert_eq!(hw.bytes_per_frame, desc.bytes_per_frame);
        assert_eq!(hw.format, desc.format);
    }
}
