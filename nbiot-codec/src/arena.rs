//! Bump allocator over a caller-supplied buffer.
//!
//! ```text
//! +-----------------+---------+---------+-----+----------------------+
//! | reserved header | chunk 0 | chunk 1 | ... | free (zero-filled)   |
//! +-----------------+---------+---------+-----+----------------------+
//! 0                 base                      offset                 capacity
//! ```
//!
//! Chunks are 4-byte aligned and handed out by offset. There is no
//! individual deallocation; [`Arena::reset`] zeroes the whole buffer and
//! rewinds the cursor to the end of the reserved header.

use crate::error::CodecError;

/// Allocation granularity in bytes.
pub const ARENA_ALIGN: usize = 4;

/// Rounds `n` up to the next multiple of [`ARENA_ALIGN`].
pub const fn align_up(n: usize) -> usize {
    (n + ARENA_ALIGN - 1) & !(ARENA_ALIGN - 1)
}

/// Location of an allocated chunk inside an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Byte offset from the start of the backing buffer.
    pub offset: usize,
    /// Requested length (the aligned footprint may be larger).
    pub len: usize,
}

impl Span {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Allocate-only arena borrowed from a caller buffer.
#[derive(Debug)]
pub struct Arena<'a> {
    buf: &'a mut [u8],
    base: usize,
    offset: usize,
}

impl<'a> Arena<'a> {
    /// Binds an arena to `buf`, reserving the first `header_size` bytes.
    pub fn new(buf: &'a mut [u8], header_size: usize) -> Result<Self, CodecError> {
        let base = align_up(header_size);
        if base > buf.len() {
            return Err(CodecError::ArenaExhausted {
                requested: base,
                available: buf.len(),
            });
        }
        Ok(Self {
            buf,
            base,
            offset: base,
        })
    }

    /// Total size of the backing buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes still available for allocation.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Reserves `n` bytes and returns where they live.
    ///
    /// Fails without moving the cursor if the aligned request does not fit.
    pub fn reserve(&mut self, n: u16) -> Option<Span> {
        let aligned = align_up(n as usize);
        if self.offset + aligned > self.buf.len() {
            return None;
        }
        let span = Span {
            offset: self.offset,
            len: n as usize,
        };
        self.offset += aligned;
        Some(span)
    }

    /// Allocates `n` bytes and returns them as a mutable slice.
    pub fn alloc(&mut self, n: u16) -> Option<&mut [u8]> {
        let span = self.reserve(n)?;
        Some(&mut self.buf[span.range()])
    }

    /// Allocates and fills a chunk, failing with `ArenaExhausted`.
    pub fn alloc_copy(&mut self, bytes: &[u8]) -> Result<Span, CodecError> {
        let n = u16::try_from(bytes.len()).map_err(|_| CodecError::ValueTooLong {
            len: bytes.len(),
            max: u16::MAX as usize,
        })?;
        let span = self.reserve(n).ok_or(CodecError::ArenaExhausted {
            requested: align_up(bytes.len()),
            available: self.remaining(),
        })?;
        self.buf[span.range()].copy_from_slice(bytes);
        Ok(span)
    }

    /// Reads back an allocated chunk.
    pub fn get(&self, span: Span) -> &[u8] {
        &self.buf[span.range()]
    }

    pub fn get_mut(&mut self, span: Span) -> &mut [u8] {
        &mut self.buf[span.range()]
    }

    /// The reserved header bytes.
    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.base]
    }

    pub fn header(&self) -> &[u8] {
        &self.buf[..self.base]
    }

    /// Unallocated space after the cursor. Writing here does not allocate.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..]
    }

    /// Splits the buffer at the cursor into allocated and free regions.
    pub fn split_at_cursor(&mut self) -> (&[u8], &mut [u8]) {
        let (head, tail) = self.buf.split_at_mut(self.offset);
        (&*head, tail)
    }

    /// Zeroes the unallocated tail.
    pub fn clear_tail(&mut self) {
        self.tail_mut().fill(0);
    }

    /// Zeroes the whole buffer and rewinds the cursor.
    pub fn reset(&mut self) {
        self.buf.fill(0);
        self.offset = self.base;
    }
}
