//! Lock-free single-producer/single-consumer byte ring.
//!
//! [`RingState`] is the index protocol on its own: it hands out offsets into
//! a buffer it never touches. [`RingBuffer`] pairs it with caller-supplied
//! storage and splits into one [`RingWriter`] and one [`RingReader`].
//!
//! Reservations are always contiguous. When a write does not fit between
//! the write index and the physical end of the buffer but does fit at the
//! start, the writer wraps early and leaves a *gap*: the unused tail is
//! recorded and the reader jumps over it once it gets there.
//!
//! ```text
//!  0        write          read      gap start    size
//!  |==========|..............|===========|~~~~~~~~~|
//!    new data       free        old data     gap
//! ```
//!
//! One slot always stays free, so `read == write` means empty and the usable
//! capacity is `size - 1`.

mod buffer;
mod word;

pub use buffer::{RingBuffer, RingReader, RingWriter};
pub use word::RingWord;

use core::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use log::trace;

/// Largest ring the 15-bit indices can address.
pub const MAX_RING_SIZE: usize = 0x7FFF;

/// Error returned when sizing a ring.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("ring of {0} bytes is too small, at least 2 are needed")]
    TooSmall(usize),
    #[error("ring of {0} bytes exceeds the 32767-byte maximum")]
    TooLarge(usize),
}

/// A contiguous run of readable bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Run {
    pub offset: usize,
    pub len: usize,
}

/// Index state shared by the two endpoints of a ring.
///
/// `writer_*` methods must only be called from the single writer context and
/// `reader_*` methods from the single reader context. Breaking that rule
/// corrupts the indices; it is neither detected nor memory-unsafe here.
pub struct RingState {
    word: AtomicU32,
    /// Length of the committed gap; meaningful while `has_gap` is set.
    gap: AtomicU16,
    /// Writer-private: gap the last reservation would create.
    pending_gap: AtomicU16,
    /// Reader-private: bytes reported by the last `reader_get_avail`.
    last_avail: AtomicU16,
    size: u16,
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn to_index(v: usize) -> u16 {
    debug_assert!(v <= MAX_RING_SIZE);
    v as u16
}

impl RingState {
    /// # Errors
    /// [`RingError`] if `size` is not within `2..=MAX_RING_SIZE`.
    pub const fn new(size: usize) -> Result<Self, RingError> {
        if size < 2 {
            return Err(RingError::TooSmall(size));
        }
        if size > MAX_RING_SIZE {
            return Err(RingError::TooLarge(size));
        }
        Ok(Self {
            word: AtomicU32::new(0),
            gap: AtomicU16::new(0),
            pending_gap: AtomicU16::new(0),
            last_avail: AtomicU16::new(0),
            size: to_index(size),
        })
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        usize::from(self.size)
    }

    /// Most bytes the ring can hold at once.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.size() - 1
    }

    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> RingWord {
        RingWord::from_bits(self.word.load(Ordering::Acquire))
    }

    /// Free bytes, `(read - write - 1) mod size`. Not all of them need be
    /// contiguous.
    #[must_use]
    pub fn free(&self) -> usize {
        let w = self.snapshot();
        let (read, write) = (usize::from(w.read_index()), usize::from(w.write_index()));
        (read + self.size() - write - 1) % self.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let w = self.snapshot();
        w.read_index() == w.write_index()
    }

    /// Whether the reader has flagged itself idle.
    #[must_use]
    pub fn spare_bit(&self) -> bool {
        self.snapshot().spare()
    }

    /// Clears the idle flag; returns whether it was set.
    pub fn clear_spare_bit(&self) -> bool {
        let mask = RingWord::new().with_spare(true).into_bits();
        self.word.fetch_and(!mask, Ordering::AcqRel) & mask != 0
    }

    /// Finds room for `count` contiguous bytes.
    ///
    /// Returns the offset to write to, or `None` (state untouched) if the
    /// bytes fit neither at the write index nor at the start of the buffer.
    /// A reservation at the start leaves a gap that
    /// [`writer_wrote`](Self::writer_wrote) commits.
    pub fn writer_get_offset(&self, count: usize) -> Option<usize> {
        if count > self.capacity() {
            return None;
        }
        let w = self.snapshot();
        let (read, write) = (usize::from(w.read_index()), usize::from(w.write_index()));
        let size = self.size();

        let (offset, gap) = if write >= read {
            // Filling up to the end is fine unless that lands on read == 0.
            let tail = size - write - usize::from(read == 0);
            if count <= tail {
                (write, 0)
            } else if count < read {
                (0, size - write)
            } else {
                return None;
            }
        } else if count < read - write {
            (write, 0)
        } else {
            return None;
        };

        if gap != 0 {
            trace!("ring: {count}-byte reservation wraps early, skipping {gap} tail bytes");
        }
        self.pending_gap.store(to_index(gap), Ordering::Relaxed);
        Some(offset)
    }

    /// Publishes `count` bytes written at `offset`, which must be what the
    /// last [`writer_get_offset`](Self::writer_get_offset) for `count`
    /// returned.
    ///
    /// # Panics
    /// Panics if the range runs past the end of the buffer.
    pub fn writer_wrote(&self, offset: usize, count: usize) {
        let size = self.size();
        let end = offset + count;
        assert!(end <= size, "ring write past the end of the buffer");
        let write = if end == size { 0 } else { end };

        let gap = self.pending_gap.swap(0, Ordering::Relaxed);
        debug_assert!(gap == 0 || offset == 0, "gap recorded for a non-wrapping write");
        if gap != 0 {
            // Published by the Release CAS below, together with has_gap.
            self.gap.store(gap, Ordering::Relaxed);
        }

        let mut cur = RingWord::from_bits(self.word.load(Ordering::Relaxed));
        loop {
            debug_assert!(gap == 0 || !cur.has_gap(), "second gap before the first was skipped");
            let next = cur
                .with_write_index(to_index(write))
                .with_has_gap(cur.has_gap() || gap != 0);
            match self.word.compare_exchange_weak(
                cur.into_bits(),
                next.into_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => cur = RingWord::from_bits(actual),
            }
        }
    }

    /// Reports the next contiguous run of readable bytes.
    ///
    /// Jumps over a committed gap once the read index has reached it. With
    /// `set_spare_on_empty`, an empty ring also gets its spare bit set,
    /// atomically with the observation that it was empty.
    pub fn reader_get_avail(&self, set_spare_on_empty: bool) -> Run {
        let size = self.size();
        let mut cur = self.snapshot();
        loop {
            let read = usize::from(cur.read_index());
            let write = usize::from(cur.write_index());

            let len = if cur.has_gap() {
                let gap_start = size - usize::from(self.gap.load(Ordering::Relaxed));
                if read == gap_start {
                    let next = cur.with_read_index(0).with_has_gap(false);
                    cur = match self.word.compare_exchange_weak(
                        cur.into_bits(),
                        next.into_bits(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => next,
                        Err(actual) => RingWord::from_bits(actual),
                    };
                    continue;
                }
                gap_start - read
            } else if write >= read {
                write - read
            } else {
                size - read
            };

            if len == 0 && set_spare_on_empty && !cur.spare() {
                if let Err(actual) = self.word.compare_exchange_weak(
                    cur.into_bits(),
                    cur.with_spare(true).into_bits(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    // The writer may just have produced something; look again.
                    cur = RingWord::from_bits(actual);
                    continue;
                }
            }

            self.last_avail.store(to_index(len), Ordering::Relaxed);
            return Run { offset: read, len };
        }
    }

    /// Releases `count` bytes at the front of the last reported run back to
    /// the writer.
    ///
    /// # Panics
    /// Panics if `count` exceeds what was last reported as available.
    pub fn reader_consumed(&self, count: usize) {
        let avail = usize::from(self.last_avail.load(Ordering::Relaxed));
        assert!(
            count <= avail,
            "consumed {count} ring bytes but only {avail} were available"
        );
        let size = self.size();

        let mut cur = RingWord::from_bits(self.word.load(Ordering::Relaxed));
        loop {
            let end = usize::from(cur.read_index()) + count;
            let next = cur.with_read_index(to_index(if end == size { 0 } else { end }));
            match self.word.compare_exchange_weak(
                cur.into_bits(),
                next.into_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = RingWord::from_bits(actual),
            }
        }
        self.last_avail.store(to_index(avail - count), Ordering::Relaxed);
    }
}
