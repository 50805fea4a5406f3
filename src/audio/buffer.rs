//! Frame buffers used on the realtime path
//!
//! [`StagingBuffer`] holds one period of raw captured frames. [`DuplexRing`]
//! carries captured frames from the input callback to the output callback
//! when the two run as separate host invocations. Everything here is
//! allocated during stream configuration; nothing allocates per period.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::format::StreamDescriptor;

/// Single raw sample buffer sized for a fixed number of frames
pub struct StagingBuffer {
    data: Box<[u8]>,
    bytes_per_frame: usize,
}

impl StagingBuffer {
    /// Allocate room for `frames` frames of `desc`
    pub fn new(desc: &StreamDescriptor, frames: u32) -> Self {
        Self::with_frame_size(desc.bytes_per_frame(), frames as usize)
    }

    pub fn with_frame_size(bytes_per_frame: usize, frames: usize) -> Self {
        Self {
            data: vec![0u8; bytes_per_frame * frames].into_boxed_slice(),
            bytes_per_frame,
        }
    }

    /// Number of frames the buffer can hold
    pub fn capacity_frames(&self) -> usize {
        if self.bytes_per_frame == 0 {
            0
        } else {
            self.data.len() / self.bytes_per_frame
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    pub fn fits(&self, frames: u32) -> bool {
        frames as usize <= self.capacity_frames()
    }

    /// The first `frames` frames. Panics if `frames` exceeds the capacity.
    pub fn frames(&self, frames: u32) -> &[u8] {
        &self.data[..frames as usize * self.bytes_per_frame]
    }

    /// Mutable view of the first `frames` frames. Panics if `frames` exceeds the capacity.
    pub fn frames_mut(&mut self, frames: u32) -> &mut [u8] {
        &mut self.data[..frames as usize * self.bytes_per_frame]
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// One period worth of captured frames circulating through a [`DuplexRing`]
struct CaptureBlock {
    data: Box<[u8]>,
    /// Valid bytes at the front of `data`
    len: usize,
}

/// Bounded ring carrying captured input frames to the output side of a
/// duplex stream.
///
/// Blocks are pre-allocated and move between a `free` and a `filled` queue,
/// so both sides run without locks or allocation. The producer is the input
/// callback; the single consumer holds a [`RingReader`].
pub struct DuplexRing {
    free: ArrayQueue<CaptureBlock>,
    filled: ArrayQueue<CaptureBlock>,
    bytes_per_frame: usize,
    block_bytes: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl DuplexRing {
    /// Create a ring of `blocks` blocks of `block_frames` frames each
    pub fn new(bytes_per_frame: usize, block_frames: usize, blocks: usize) -> Self {
        let blocks = blocks.max(1);
        let block_bytes = bytes_per_frame * block_frames;
        let free = ArrayQueue::new(blocks);
        for _ in 0..blocks {
            let _ = free.push(CaptureBlock {
                data: vec![0u8; block_bytes].into_boxed_slice(),
                len: 0,
            });
        }

        Self {
            free,
            filled: ArrayQueue::new(blocks),
            bytes_per_frame,
            block_bytes,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Queue captured frames. Frames that do not fit in a block are dropped.
    /// Returns false if no block was free (overflow).
    pub fn push(&self, frames: &[u8]) -> bool {
        let mut block = match self.free.pop() {
            Some(block) => block,
            None => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let whole = frames.len().min(self.block_bytes) / self.bytes_per_frame * self.bytes_per_frame;
        block.data[..whole].copy_from_slice(&frames[..whole]);
        block.len = whole;

        if let Err(block) = self.filled.push(block) {
            // Only reachable if blocks leaked out of the pool; return it.
            let _ = self.free.push(block);
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            queued_blocks: self.filled.len(),
            capacity_blocks: self.filled.capacity(),
            overflows: self.overflow_count.load(Ordering::Relaxed),
            underruns: self.underrun_count.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side of a [`DuplexRing`]; keeps the partially read block
pub struct RingReader {
    current: Option<CaptureBlock>,
    offset: usize,
}

impl RingReader {
    pub fn new() -> Self {
        Self {
            current: None,
            offset: 0,
        }
    }

    /// Fill `dest` with queued frames. Missing frames are zero-filled and
    /// counted as an underrun. Returns the number of bytes taken from the ring.
    pub fn read(&mut self, ring: &DuplexRing, dest: &mut [u8]) -> usize {
        let mut written = 0;

        while written < dest.len() {
            if self.current.is_none() {
                match ring.filled.pop() {
                    Some(block) => {
                        self.current = Some(block);
                        self.offset = 0;
                    }
                    None => break,
                }
            }

            let Some(block) = self.current.as_ref() else {
                break;
            };
            let available = block.len - self.offset;
            let n = available.min(dest.len() - written);
            dest[written..written + n].copy_from_slice(&block.data[self.offset..self.offset + n]);
            written += n;
            self.offset += n;

            if self.offset >= block.len {
                if let Some(block) = self.current.take() {
                    let _ = ring.free.push(block);
                }
                self.offset = 0;
            }
        }

        if written < dest.len() {
            dest[written..].fill(0);
            ring.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Return any partially read block to the ring
    pub fn release(&mut self, ring: &DuplexRing) {
        if let Some(block) = self.current.take() {
            let _ = ring.free.push(block);
        }
        self.offset = 0;
    }
}

impl Default for RingReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Duplex ring statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub queued_blocks: usize,
    pub capacity_blocks: usize,
    pub overflows: usize,
    pub underruns: usize,
}

impl RingStats {
    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        if self.capacity_blocks == 0 {
            0.0
        } else {
            self.queued_blocks as f32 / self.capacity_blocks as f32
        }
    }
}
