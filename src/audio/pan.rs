//! Stereo panning applied to rendered output
//!
//! Linear pan law. For `pan < 0` the right channel is folded into the left
//! by `|pan|` and attenuated by the same amount; `pan > 0` mirrors that.
//! `pan == 0` leaves the samples untouched.

use super::format::SampleFormat;

/// Pan interleaved stereo frames in place
pub fn pan_stereo(bytes: &mut [u8], format: SampleFormat, pan: f32) {
    if pan == 0.0 {
        return;
    }
    let pan = pan.clamp(-1.0, 1.0);

    if format.is_float() {
        pan_frames::<4>(bytes, pan, format.is_big_endian(), read_f32, write_f32);
    } else {
        pan_frames::<2>(bytes, pan, format.is_big_endian(), read_i16, write_i16);
    }
}

/// Apply the pan law to one left/right pair
#[inline]
pub fn pan_pair(left: f32, right: f32, pan: f32) -> (f32, f32) {
    if pan < 0.0 {
        let amount = -pan;
        (left + right * amount, right * (1.0 - amount))
    } else {
        (left * (1.0 - pan), right + left * pan)
    }
}

fn pan_frames<const N: usize>(
    bytes: &mut [u8],
    pan: f32,
    big_endian: bool,
    read: fn([u8; N], bool) -> f32,
    write: fn(f32, bool) -> [u8; N],
) {
    for frame in bytes.chunks_exact_mut(2 * N) {
        let (l_bytes, r_bytes) = frame.split_at_mut(N);
        let mut l = [0u8; N];
        let mut r = [0u8; N];
        l.copy_from_slice(l_bytes);
        r.copy_from_slice(r_bytes);

        let (left, right) = pan_pair(read(l, big_endian), read(r, big_endian), pan);
        l_bytes.copy_from_slice(&write(left, big_endian));
        r_bytes.copy_from_slice(&write(right, big_endian));
    }
}

fn read_f32(b: [u8; 4], big_endian: bool) -> f32 {
    if big_endian {
        f32::from_be_bytes(b)
    } else {
        f32::from_le_bytes(b)
    }
}

fn write_f32(v: f32, big_endian: bool) -> [u8; 4] {
    if big_endian {
        v.to_be_bytes()
    } else {
        v.to_le_bytes()
    }
}

fn read_i16(b: [u8; 2], big_endian: bool) -> f32 {
    let v = if big_endian {
        i16::from_be_bytes(b)
    } else {
        i16::from_le_bytes(b)
    };
    v as f32
}

fn write_i16(v: f32, big_endian: bool) -> [u8; 2] {
    // `as` saturates at the i16 range
    let v = v.round() as i16;
    if big_endian {
        v.to_be_bytes()
    } else {
        v.to_le_bytes()
    }
}
