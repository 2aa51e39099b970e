//! Framing buffer
//!
//! An append-mostly byte queue used to reassemble wire packets from the
//! chunked transport reads. Appended chunks are kept as whole segments (no
//! copy on enqueue); consumers peel exact byte counts off the front, and a
//! partially consumed head segment keeps its tail in place.

use std::collections::VecDeque;

use crate::error::{Result, TideError};

/// Ordered queue of byte segments with exact length accounting
#[derive(Debug, Default)]
pub struct FrameBuffer {
    /// Outstanding segments, oldest first
    segments: VecDeque<Vec<u8>>,

    /// Sum of outstanding bytes across all segments
    len: usize,
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Enqueue a chunk; takes ownership, no copy
    pub fn append(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.segments.push_back(chunk);
    }

    /// Copy the first `n` bytes without consuming them
    ///
    /// Fails when `n` is zero or exceeds the outstanding length.
    pub fn peek_first(&self, n: usize) -> Result<Vec<u8>> {
        self.check_request(n)?;

        let mut out = Vec::with_capacity(n);
        for segment in &self.segments {
            let remaining = n - out.len();
            if remaining == 0 {
                break;
            }
            let take = remaining.min(segment.len());
            out.extend_from_slice(&segment[..take]);
        }
        Ok(out)
    }

    /// Remove and return the first `n` bytes
    ///
    /// Whole segments are consumed in full; a partially consumed final
    /// segment keeps its tail as the new head segment. Fails when `n` is
    /// zero or exceeds the outstanding length.
    pub fn remove_first(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check_request(n)?;

        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            // check_request guarantees enough bytes remain
            let mut segment = self.segments.pop_front().unwrap();
            let remaining = n - out.len();

            if segment.len() <= remaining {
                out.extend_from_slice(&segment);
            } else {
                let tail = segment.split_off(remaining);
                out.extend_from_slice(&segment);
                self.segments.push_front(tail);
            }
        }

        self.len -= n;
        Ok(out)
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }

    fn check_request(&self, n: usize) -> Result<()> {
        if n == 0 || n > self.len {
            return Err(TideError::BufferUnderflow {
                requested: n,
                available: self.len,
            });
        }
        Ok(())
    }
}
