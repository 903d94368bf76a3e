//! Bounded I/Q sample store shared between the hardware callback and the pipeline.
//!
//! The producer never waits on the consumer: when a push would overflow the arena the
//! oldest samples are dropped so that only the most recent half of the capacity remains.
//! Reads are non-destructive snapshots of the newest samples, so successive pulls overlap.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustfft::num_complex::Complex;

use crate::ComplexSample;

/// Fixed-capacity circular arena of complex samples
#[derive(Debug)]
pub struct SampleRing {
    buf: Box<[ComplexSample]>,
    // Next write position
    head: usize,
    len: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buf: vec![Complex::default(); capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append paired I and Q samples. Extra samples on the longer side are ignored.
    pub fn push(&mut self, i: &[f32], q: &[f32]) {
        self.extend(i.iter().zip(q).map(|(&re, &im)| Complex::new(re, im)));
    }

    /// Append samples, applying the truncation policy if capacity would be exceeded
    pub fn extend<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = ComplexSample>,
        I::IntoIter: ExactSizeIterator,
    {
        let samples = samples.into_iter();
        let n = samples.len();
        let cap = self.capacity();
        let mut skip = 0;
        if self.len + n > cap {
            let keep = cap / 2;
            if n >= keep {
                // Nothing old survives, and only the tail of the new data does
                self.len = 0;
                skip = n - keep;
            } else {
                self.len = keep - n;
            }
        }
        for s in samples.skip(skip) {
            self.buf[self.head] = s;
            self.head = (self.head + 1) % cap;
        }
        self.len += n - skip;
    }

    /// Copy out the newest `n` samples, oldest first, or `None` if fewer are buffered
    pub fn latest(&self, n: usize) -> Option<Vec<ComplexSample>> {
        if n > self.len {
            return None;
        }
        let cap = self.capacity();
        let start = (self.head + cap - n) % cap;
        let mut out = Vec::with_capacity(n);
        if start + n <= cap {
            out.extend_from_slice(&self.buf[start..start + n]);
        } else {
            out.extend_from_slice(&self.buf[start..]);
            out.extend_from_slice(&self.buf[..n - (cap - start)]);
        }
        Some(out)
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// A [`SampleRing`] behind a mutex so the callback thread and the pipeline can share it
#[derive(Debug)]
pub struct SharedRing {
    inner: Mutex<SampleRing>,
    capacity: usize,
}

impl SharedRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SampleRing::new(capacity)),
            capacity,
        }
    }

    // A panic elsewhere while holding the lock leaves the ring structurally valid,
    // so keep going rather than propagating the poison into the callback thread
    fn lock(&self) -> MutexGuard<'_, SampleRing> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, i: &[f32], q: &[f32]) {
        self.lock().push(i, q);
    }

    pub fn extend<I>(&self, samples: I)
    where
        I: IntoIterator<Item = ComplexSample>,
        I::IntoIter: ExactSizeIterator,
    {
        self.lock().extend(samples);
    }

    /// Snapshot of the most recent `n` samples; `None` means not enough data yet
    pub fn pull(&self, n: usize) -> Option<Vec<ComplexSample>> {
        self.lock().latest(n)
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
