//! Bounded force-sample buffer.
//!
//! Capacity is fixed at construction. Once full, new samples are dropped and
//! counted; existing samples are never evicted, so the buffer always holds the
//! first `capacity` samples of the contact event.

/// Samples allocated up front; larger buffers grow on demand.
const PREALLOCATE_LIMIT: usize = 4096;

/// Fixed-capacity, drop-new sample buffer.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<f64>,
    capacity: usize,
    dropped: u64,
}

impl SampleBuffer {
    /// Create an empty buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
            dropped: 0,
        }
    }

    /// Append a sample. Returns `false` if the buffer was full and the sample
    /// was dropped.
    pub fn push(&mut self, value: f64) -> bool {
        if self.samples.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.samples.push(value);
        true
    }

    /// Remove all samples and reset the drop counter. Keeps the allocation.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.dropped = 0;
    }

    /// Samples in arrival order.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples dropped since the last clear.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Largest stored sample, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn max_of_samples() {
        let mut buffer = SampleBuffer::new(10);
        for v in [10.0, 50.0, 30.0, 25.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.max(), Some(50.0));
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn empty_buffer_has_no_max() {
        assert_eq!(SampleBuffer::new(4).max(), None);
    }

    #[test]
    fn full_buffer_drops_new_samples() {
        let mut buffer = SampleBuffer::new(3);
        assert!(buffer.push(1.0));
        assert!(buffer.push(2.0));
        assert!(buffer.push(3.0));
        assert!(!buffer.push(4.0));
        assert!(!buffer.push(5.0));

        assert_eq!(buffer.samples(), &[1.0, 2.0, 3.0]);
        assert_eq!(buffer.dropped(), 2);
    }

    #[test]
    fn clear_resets_samples_and_drop_count() {
        let mut buffer = SampleBuffer::new(1);
        buffer.push(1.0);
        buffer.push(2.0);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 0);
        assert_eq!(buffer.capacity(), 1);
    }

    #[test]
    fn large_capacity_is_not_preallocated() {
        let mut buffer = SampleBuffer::new(usize::MAX);
        assert!(buffer.push(1.0));
        assert_eq!(buffer.capacity(), usize::MAX);
        assert!(buffer.samples.capacity() <= PREALLOCATE_LIMIT);
    }
}
