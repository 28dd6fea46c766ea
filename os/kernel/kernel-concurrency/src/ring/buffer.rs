use super::{RingError, RingState, Run};
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::slice;

/// A byte ring over caller-supplied storage.
///
/// The ring borrows its storage for its whole life; the storage length is
/// the ring size. Data moves through the two endpoints returned by
/// [`split`](Self::split), which can be sent to different threads.
pub struct RingBuffer<'a> {
    state: RingState,
    base: NonNull<u8>,
    _storage: PhantomData<&'a mut [u8]>,
}

// Safety: the endpoints only ever touch disjoint regions, as partitioned by
// the index protocol in `RingState`.
unsafe impl Send for RingBuffer<'_> {}
unsafe impl Sync for RingBuffer<'_> {}

impl<'a> RingBuffer<'a> {
    /// # Errors
    /// [`RingError`] if the storage is shorter than 2 or longer than
    /// [`MAX_RING_SIZE`](super::MAX_RING_SIZE) bytes.
    pub fn new(storage: &'a mut [u8]) -> Result<Self, RingError> {
        let state = RingState::new(storage.len())?;
        Ok(Self {
            state,
            base: NonNull::from(storage).cast(),
            _storage: PhantomData,
        })
    }

    #[inline]
    pub const fn state(&self) -> &RingState {
        &self.state
    }

    /// The writing and the reading endpoint. Exclusive access to the ring
    /// guarantees there is only ever one of each.
    pub fn split(&mut self) -> (RingWriter<'_>, RingReader<'_>) {
        (
            RingWriter {
                state: &self.state,
                base: self.base,
                reserved: None,
                _storage: PhantomData,
            },
            RingReader {
                state: &self.state,
                base: self.base,
                _storage: PhantomData,
            },
        )
    }
}

/// The producing end of a [`RingBuffer`].
pub struct RingWriter<'r> {
    state: &'r RingState,
    base: NonNull<u8>,
    reserved: Option<(usize, usize)>,
    _storage: PhantomData<&'r mut [u8]>,
}

unsafe impl Send for RingWriter<'_> {}

impl RingWriter<'_> {
    #[inline]
    #[must_use]
    pub fn free(&self) -> usize {
        self.state.free()
    }

    /// Reserves `count` contiguous bytes for writing in place. The bytes
    /// become visible to the reader on [`commit`](Self::commit); reserving
    /// again without committing discards the reservation. Placement follows
    /// the same rules as [`write`](Self::write).
    pub fn reserve(&mut self, count: usize) -> Option<&mut [u8]> {
        let offset = self.state.writer_get_offset(count)?;
        self.reserved = Some((offset, count));
        // SAFETY: the range lies in the free region, which the reader does
        // not look at until it is committed.
        Some(unsafe { slice::from_raw_parts_mut(self.base.as_ptr().add(offset), count) })
    }

    /// Publishes the outstanding reservation.
    ///
    /// # Panics
    /// Panics if nothing is reserved.
    pub fn commit(&mut self) {
        let Some((offset, count)) = self.reserved.take() else {
            panic!("ring commit without a reservation");
        };
        self.state.writer_wrote(offset, count);
    }

    /// Writes all of `data` contiguously, or nothing if it does not fit.
    ///
    /// Fitting needs `data.len()` bytes before the physical end of the
    /// buffer, or fewer than `read` bytes at its start, so a write can be
    /// refused even though [`free`](Self::free) is large enough, an empty
    /// ring included: with size 16 and both indices at 8, 14 bytes fit in
    /// neither place. Retrying the same length then only succeeds once the
    /// indices have moved, which on an empty ring takes a shorter write.
    pub fn write(&mut self, data: &[u8]) -> bool {
        let Some(dst) = self.reserve(data.len()) else {
            return false;
        };
        dst.copy_from_slice(data);
        self.commit();
        true
    }
}

/// The consuming end of a [`RingBuffer`].
pub struct RingReader<'r> {
    state: &'r RingState,
    base: NonNull<u8>,
    _storage: PhantomData<&'r [u8]>,
}

unsafe impl Send for RingReader<'_> {}

impl RingReader<'_> {
    /// The next contiguous run of readable bytes; empty if there are none.
    pub fn peek(&mut self) -> &[u8] {
        self.run(false)
    }

    /// Like [`peek`](Self::peek), but flags the reader idle in the ring's
    /// spare bit if nothing is available.
    pub fn peek_or_mark_idle(&mut self) -> &[u8] {
        self.run(true)
    }

    /// Hands the first `count` bytes of the last peeked run back to the
    /// writer.
    pub fn consume(&mut self, count: usize) {
        self.state.reader_consumed(count);
    }

    /// Copies as many bytes as are available, up to `buf.len()`, following
    /// the ring across the end of the buffer and over gaps.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut done = 0;
        while done < buf.len() {
            let run = self.peek();
            if run.is_empty() {
                break;
            }
            let n = run.len().min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&run[..n]);
            self.consume(n);
            done += n;
        }
        done
    }

    fn run(&mut self, mark_idle: bool) -> &[u8] {
        let Run { offset, len } = self.state.reader_get_avail(mark_idle);
        // SAFETY: the run was committed by the writer, which will not reuse
        // it before we consume it.
        unsafe { slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
    }
}
