//! Single-writer, multi-reader sample ring.
//!
//! The ring is a flat array of atomic bytes addressed by absolute sample
//! position. The writer publishes `claimed` (the end of the block it is about
//! to write) before touching any byte and `committed` after the last byte.
//! A reader copies a range below `committed`, then checks against `claimed`
//! that none of the copied positions could have been reused meanwhile. The
//! writer never waits on readers.

use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::error::BufferError;
use crate::sample::{SampleBlock, SampleFormat, SampleWindow};

/// Largest ring a buffer may allocate.
pub const MAX_RING_BYTES: usize = 1 << 30;

/// Longest a reader sleeps before re-checking the write position.
const WAIT_SLICE: Duration = Duration::from_millis(2);

/// Read position of one consumer in one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadCursor {
    pos: u64,
}

impl ReadCursor {
    /// Absolute sample position of the next unread sample.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

pub struct SampleBuffer {
    format: SampleFormat,
    capacity: u64,
    sample_bytes: usize,
    ring: Box<[AtomicU8]>,
    claimed: AtomicU64,
    committed: AtomicU64,
    origin_us: AtomicI64,
    overwritten: AtomicU64,
    closed: AtomicBool,
    waiters: AtomicUsize,
    lock: Mutex<()>,
    signal: Condvar,
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("format", &self.format)
            .field("capacity", &self.capacity)
            .field("committed", &self.committed.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SampleBuffer {
    /// Create a ring holding `seconds` worth of samples (at least one).
    pub fn with_duration(format: SampleFormat, seconds: f64) -> Result<Self, BufferError> {
        Self::with_capacity(format, format.samples_for(seconds).max(1))
    }

    /// Create a ring holding exactly `capacity` samples.
    pub fn with_capacity(format: SampleFormat, capacity: usize) -> Result<Self, BufferError> {
        format
            .validate()
            .map_err(|e| BufferError::InvalidRequest(e.to_string()))?;
        if capacity == 0 {
            return Err(BufferError::InvalidRequest(
                "capacity must be at least one sample".to_string(),
            ));
        }
        let sample_bytes = format.sample_bytes();
        let ring_bytes = capacity
            .checked_mul(sample_bytes)
            .filter(|&bytes| bytes <= MAX_RING_BYTES)
            .ok_or_else(|| {
                BufferError::InvalidRequest(format!(
                    "{capacity} samples of {sample_bytes} bytes exceed the {MAX_RING_BYTES} byte ring limit"
                ))
            })?;
        let ring = (0..ring_bytes)
            .map(|_| AtomicU8::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            format,
            capacity: capacity as u64,
            sample_bytes,
            ring,
            claimed: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            origin_us: AtomicI64::new(0),
            overwritten: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            waiters: AtomicUsize::new(0),
            lock: Mutex::new(()),
            signal: Condvar::new(),
        })
    }

    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Total samples written since creation.
    pub fn written(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Total samples overwritten before every reader could have seen them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A cursor at the oldest position, so the first window starts with the
    /// first sample ever written.
    pub fn cursor(&self) -> ReadCursor {
        ReadCursor::default()
    }

    /// A cursor at the current write position.
    pub fn cursor_at_head(&self) -> ReadCursor {
        ReadCursor {
            pos: self.written(),
        }
    }

    /// Append a block. Never blocks; the oldest samples are overwritten when
    /// the ring is full.
    ///
    /// Must only be called from the buffer's single writer.
    pub fn write(&self, block: &SampleBlock) -> Result<(), BufferError> {
        if self.is_closed() {
            return Err(BufferError::Closed);
        }
        if block.format != self.format {
            return Err(BufferError::FormatMismatch);
        }
        let count = block.count as u64;
        if count == 0 {
            return Ok(());
        }

        let start = self.committed.load(Ordering::Relaxed);
        let end = start + count;
        if start == 0 {
            self.origin_us.store(block.time_us, Ordering::Relaxed);
        }

        self.claimed.store(end, Ordering::Relaxed);
        fence(Ordering::Release);

        let keep = count.min(self.capacity);
        let skip = ((count - keep) as usize) * self.sample_bytes;
        self.store_bytes(end - keep, &block.data[skip..]);

        let lost = end.saturating_sub(self.capacity) - start.saturating_sub(self.capacity);
        if lost > 0 {
            self.overwritten.fetch_add(lost, Ordering::Relaxed);
        }

        self.committed.store(end, Ordering::Release);
        self.wake();
        Ok(())
    }

    /// Read the next `count` samples.
    ///
    /// Waits up to `wait` for them to be written, then returns `NotReady`.
    pub fn read(
        &self,
        cursor: &mut ReadCursor,
        count: usize,
        wait: Duration,
    ) -> Result<SampleWindow, BufferError> {
        self.read_window(cursor, count, 0, wait)
    }

    /// Read `frame` new samples preceded by `delta` samples of overlap.
    ///
    /// Windows always hold `frame + delta` samples, so the first window waits
    /// until the overlap exists. On success the cursor advances by `frame`.
    /// If any sample of the window was overwritten the cursor is moved to the
    /// write position and `Overrun` is returned.
    pub fn read_window(
        &self,
        cursor: &mut ReadCursor,
        frame: usize,
        delta: usize,
        wait: Duration,
    ) -> Result<SampleWindow, BufferError> {
        if frame == 0 {
            return Err(BufferError::InvalidRequest(
                "window must hold at least one new sample".to_string(),
            ));
        }
        let span = (frame + delta) as u64;
        if span > self.capacity {
            return Err(BufferError::InvalidRequest(format!(
                "window of {span} samples exceeds capacity {}",
                self.capacity
            )));
        }

        let deadline = Instant::now() + wait;
        loop {
            if self.is_closed() {
                return Err(BufferError::Closed);
            }
            if let Some(result) = self.try_read(cursor, frame as u64, span) {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BufferError::NotReady);
            }
            self.wait_for_write((deadline - now).min(WAIT_SLICE));
        }
    }

    /// Close the buffer and wake every waiting reader.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.signal.notify_all();
    }

    fn try_read(
        &self,
        cursor: &mut ReadCursor,
        frame: u64,
        span: u64,
    ) -> Option<Result<SampleWindow, BufferError>> {
        let committed = self.committed.load(Ordering::Acquire);
        let end = (cursor.pos + frame).max(span);
        let start = end - span;

        if self.overwritten_before(committed, start) {
            return Some(Err(self.resync(cursor)));
        }
        if committed < end {
            return None;
        }

        let data = self.load_bytes(start, span);
        fence(Ordering::Acquire);
        let claimed = self.claimed.load(Ordering::Relaxed);
        if self.overwritten_before(claimed, start) {
            return Some(Err(self.resync(cursor)));
        }

        let overlap = cursor.pos.saturating_sub(start) as usize;
        cursor.pos = end;
        let origin = self.origin_us.load(Ordering::Relaxed);
        Some(Ok(SampleWindow {
            format: self.format,
            time_us: origin + self.format.offset_us(start),
            count: span as usize,
            overlap,
            data,
        }))
    }

    fn overwritten_before(&self, written: u64, start: u64) -> bool {
        written > self.capacity && start < written - self.capacity
    }

    fn resync(&self, cursor: &mut ReadCursor) -> BufferError {
        let head = self.committed.load(Ordering::Acquire);
        let lost = head.saturating_sub(cursor.pos);
        tracing::warn!(
            from = cursor.pos,
            to = head,
            lost,
            "sample buffer overrun, reader resynchronized"
        );
        cursor.pos = head;
        BufferError::Overrun { lost }
    }

    fn store_bytes(&self, first_sample: u64, bytes: &[u8]) {
        let ring_len = self.ring.len();
        let offset = (first_sample % self.capacity) as usize * self.sample_bytes;
        let head = bytes.len().min(ring_len - offset);
        for (slot, byte) in self.ring[offset..offset + head].iter().zip(&bytes[..head]) {
            slot.store(*byte, Ordering::Relaxed);
        }
        for (slot, byte) in self.ring.iter().zip(&bytes[head..]) {
            slot.store(*byte, Ordering::Relaxed);
        }
    }

    fn load_bytes(&self, first_sample: u64, samples: u64) -> Bytes {
        let len = samples as usize * self.sample_bytes;
        let offset = (first_sample % self.capacity) as usize * self.sample_bytes;
        let head = len.min(self.ring.len() - offset);
        let mut out = Vec::with_capacity(len);
        out.extend(
            self.ring[offset..offset + head]
                .iter()
                .chain(&self.ring[..len - head])
                .map(|slot| slot.load(Ordering::Relaxed)),
        );
        Bytes::from(out)
    }

    fn wait_for_write(&self, timeout: Duration) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock();
        let _ = self.signal.wait_for(&mut guard, timeout);
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.signal.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;

    use super::*;
    use crate::sample::SampleType;

    fn format() -> SampleFormat {
        SampleFormat::of(100.0, 1, SampleType::Int).unwrap()
    }

    fn block(first: i64, count: usize) -> SampleBlock {
        let values: Vec<f64> = (0..count).map(|i| (first + i as i64) as f64).collect();
        SampleBlock::from_values(format(), first * 10_000, &values).unwrap()
    }

    fn values(window: &SampleWindow) -> Vec<i64> {
        window
            .values()
            .unwrap()
            .into_iter()
            .map(|v| v as i64)
            .collect()
    }

    #[test]
    fn oversized_ring_is_refused() {
        let huge = SampleFormat::new(1.0, u32::MAX, u32::MAX, SampleType::Undef).unwrap();
        assert!(matches!(
            SampleBuffer::with_duration(huge, 2.0),
            Err(BufferError::InvalidRequest(_))
        ));

        let wide = SampleFormat::new(1000.0, 65_536, 65_536, SampleType::Undef).unwrap();
        assert!(matches!(
            SampleBuffer::with_duration(wide, 2.0),
            Err(BufferError::InvalidRequest(msg)) if msg.contains("ring limit")
        ));
    }

    #[test]
    fn reads_in_write_order() {
        let buffer = SampleBuffer::with_capacity(format(), 16).unwrap();
        let mut cursor = buffer.cursor();
        buffer.write(&block(0, 3)).unwrap();
        buffer.write(&block(3, 3)).unwrap();

        let first = buffer.read(&mut cursor, 4, Duration::ZERO).unwrap();
        assert_eq!(values(&first), vec![0, 1, 2, 3]);
        assert_eq!(first.time_us, 0);
        assert_eq!(cursor.position(), 4);

        assert_eq!(
            buffer.read(&mut cursor, 4, Duration::ZERO),
            Err(BufferError::NotReady)
        );
        assert_eq!(cursor.position(), 4);

        let second = buffer.read(&mut cursor, 2, Duration::ZERO).unwrap();
        assert_eq!(values(&second), vec![4, 5]);
        assert_eq!(second.time_us, 40_000);
    }

    #[test]
    fn windows_overlap_by_delta() {
        let buffer = SampleBuffer::with_capacity(format(), 16).unwrap();
        let mut cursor = buffer.cursor();
        buffer.write(&block(0, 5)).unwrap();
        assert_eq!(
            buffer.read_window(&mut cursor, 4, 2, Duration::ZERO),
            Err(BufferError::NotReady)
        );

        buffer.write(&block(5, 5)).unwrap();
        let first = buffer.read_window(&mut cursor, 4, 2, Duration::ZERO).unwrap();
        assert_eq!(values(&first), vec![0, 1, 2, 3, 4, 5]);
        let second = buffer.read_window(&mut cursor, 4, 2, Duration::ZERO).unwrap();
        assert_eq!(values(&second), vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(first.overlap, 0);
        assert_eq!(second.overlap, 2);
        // together the fresh parts cover the stream exactly once
        assert_eq!(values(&first.fresh()), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(values(&second.fresh()), vec![6, 7, 8, 9]);
    }

    #[test]
    fn wraps_around_the_ring() {
        let buffer = SampleBuffer::with_capacity(format(), 4).unwrap();
        let mut cursor = buffer.cursor();
        for i in 0..5 {
            buffer.write(&block(i * 3, 3)).unwrap();
            let window = buffer.read(&mut cursor, 3, Duration::ZERO).unwrap();
            assert_eq!(values(&window), vec![i * 3, i * 3 + 1, i * 3 + 2]);
        }
        assert_eq!(buffer.overwritten(), 11);
    }

    #[test]
    fn lagging_reader_gets_one_overrun_and_resyncs() {
        let buffer = SampleBuffer::with_capacity(format(), 8).unwrap();
        let mut cursor = buffer.cursor();
        buffer.write(&block(0, 6)).unwrap();
        buffer.write(&block(6, 6)).unwrap();

        assert_eq!(
            buffer.read(&mut cursor, 2, Duration::ZERO),
            Err(BufferError::Overrun { lost: 12 })
        );
        assert_eq!(cursor.position(), 12);
        assert_eq!(
            buffer.read(&mut cursor, 2, Duration::ZERO),
            Err(BufferError::NotReady)
        );

        buffer.write(&block(12, 2)).unwrap();
        let window = buffer.read(&mut cursor, 2, Duration::ZERO).unwrap();
        assert_eq!(values(&window), vec![12, 13]);
    }

    #[test]
    fn oversized_block_keeps_newest_samples() {
        let buffer = SampleBuffer::with_capacity(format(), 4).unwrap();
        let mut cursor = buffer.cursor_at_head();
        buffer.write(&block(0, 10)).unwrap();
        assert_eq!(buffer.written(), 10);

        let mut old = buffer.cursor();
        assert!(matches!(
            buffer.read(&mut old, 1, Duration::ZERO),
            Err(BufferError::Overrun { .. })
        ));

        let mut tail = ReadCursor { pos: 6 };
        let window = buffer.read(&mut tail, 4, Duration::ZERO).unwrap();
        assert_eq!(values(&window), vec![6, 7, 8, 9]);
        assert_eq!(window.time_us, 60_000);
        assert_eq!(cursor.position(), 0);
        assert!(matches!(
            buffer.read(&mut cursor, 1, Duration::ZERO),
            Err(BufferError::Overrun { .. })
        ));
    }

    #[test]
    fn rejects_impossible_windows_and_foreign_formats() {
        let buffer = SampleBuffer::with_capacity(format(), 4).unwrap();
        let mut cursor = buffer.cursor();
        assert!(matches!(
            buffer.read_window(&mut cursor, 3, 2, Duration::ZERO),
            Err(BufferError::InvalidRequest(_))
        ));
        assert!(matches!(
            buffer.read(&mut cursor, 0, Duration::ZERO),
            Err(BufferError::InvalidRequest(_))
        ));

        let other = SampleFormat::of(50.0, 1, SampleType::Int).unwrap();
        let foreign = SampleBlock::from_values(other, 0, &[1.0]).unwrap();
        assert_eq!(buffer.write(&foreign), Err(BufferError::FormatMismatch));
    }

    #[test]
    fn close_wakes_waiting_reader() {
        let buffer = Arc::new(SampleBuffer::with_capacity(format(), 8).unwrap());
        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut cursor = buffer.cursor();
                let started = Instant::now();
                let result = buffer.read(&mut cursor, 1, Duration::from_secs(5));
                (result, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        buffer.close();

        let (result, waited) = reader.join().unwrap();
        assert_eq!(result, Err(BufferError::Closed));
        assert!(waited < Duration::from_secs(2));
        assert_eq!(buffer.write(&block(0, 1)), Err(BufferError::Closed));
    }

    #[test]
    fn waiting_reader_sees_late_write() {
        let buffer = Arc::new(SampleBuffer::with_capacity(format(), 8).unwrap());
        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.write(&block(0, 2)).unwrap();
            })
        };
        let mut cursor = buffer.cursor();
        let window = buffer.read(&mut cursor, 2, Duration::from_secs(2)).unwrap();
        assert_eq!(values(&window), vec![0, 1]);
        writer.join().unwrap();
    }

    #[test]
    fn concurrent_reader_never_sees_torn_data() {
        let fmt = SampleFormat::of(1000.0, 4, SampleType::Int).unwrap();
        let buffer = Arc::new(SampleBuffer::with_capacity(fmt, 32).unwrap());
        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for n in 0..2000i64 {
                    let v = n as f64;
                    let block = SampleBlock::from_values(fmt, n, &[v, v, v, v]).unwrap();
                    buffer.write(&block).unwrap();
                }
            })
        };

        let mut cursor = buffer.cursor();
        let mut seen = 0u64;
        while seen < 200 {
            match buffer.read(&mut cursor, 1, Duration::from_millis(20)) {
                Ok(window) => {
                    let vals = window.values().unwrap();
                    assert!(vals.iter().all(|v| *v == vals[0]), "torn sample {vals:?}");
                    seen += 1;
                }
                Err(BufferError::Overrun { .. }) => {}
                Err(BufferError::NotReady) if writer.is_finished() => break,
                Err(BufferError::NotReady) => {}
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_lag_beyond_capacity_signals_loss_once(
            capacity in 1usize..64,
            extra in 1usize..64,
            block_len in 1usize..16,
        ) {
            let buffer = SampleBuffer::with_capacity(format(), capacity).unwrap();
            let mut cursor = buffer.cursor();
            let total = capacity + extra;
            let mut written = 0usize;
            while written < total {
                let n = block_len.min(total - written);
                buffer.write(&block(written as i64, n)).unwrap();
                written += n;
            }

            let first = buffer.read(&mut cursor, 1, Duration::ZERO);
            prop_assert_eq!(first, Err(BufferError::Overrun { lost: total as u64 }));
            prop_assert_eq!(cursor.position(), total as u64);
            prop_assert_eq!(buffer.read(&mut cursor, 1, Duration::ZERO), Err(BufferError::NotReady));
        }

        #[test]
        fn prop_reader_within_capacity_sees_every_sample(
            capacity in 4usize..32,
            blocks in proptest::collection::vec(1usize..4, 1..40),
        ) {
            let buffer = SampleBuffer::with_capacity(format(), capacity).unwrap();
            let mut cursor = buffer.cursor();
            let mut written = 0i64;
            let mut read = Vec::new();
            for n in blocks {
                buffer.write(&block(written, n)).unwrap();
                written += n as i64;
                while let Ok(window) = buffer.read(&mut cursor, 1, Duration::ZERO) {
                    read.extend(values(&window));
                }
            }
            prop_assert_eq!(read, (0..written).collect::<Vec<_>>());
        }
    }
}
