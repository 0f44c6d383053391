//! Fixed-capacity receive buffer
//!
//! Decouples the background read loop (single producer) from foreground
//! `read` calls (single consumer). When a write would catch up with the
//! read cursor, the read cursor is advanced and the oldest byte is lost;
//! the producer never blocks. Dropped bytes are counted.
//!
//! The buffer itself is not synchronised; the port keeps it behind one
//! mutex so both cursors always move together.

/// Default receive buffer capacity
pub const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Circular byte buffer with overwrite-oldest policy
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Next byte to hand to the consumer
    read: usize,
    /// Next slot the producer fills
    write: usize,
    len: usize,
    dropped: u64,
}

impl RingBuffer {
    /// Create a buffer; a zero capacity is raised to one byte
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            read: 0,
            write: 0,
            len: 0,
            dropped: 0,
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

    /// Total bytes lost to overwrites since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append bytes, overwriting the oldest on overflow
    ///
    /// Returns how many previously buffered or incoming bytes were lost.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let cap = self.capacity();

        // Anything beyond the last `cap` bytes would be overwritten in this call
        let skipped = data.len().saturating_sub(cap);
        let data = &data[skipped..];

        let overflow = (self.len + data.len()).saturating_sub(cap);
        if overflow > 0 {
            self.read = (self.read + overflow) % cap;
            self.len -= overflow;
        }

        let first = data.len().min(cap - self.write);
        self.buf[self.write..self.write + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        self.write = (self.write + data.len()) % cap;
        self.len += data.len();

        let lost = skipped + overflow;
        self.dropped += lost as u64;
        lost
    }

    /// Move up to `dest.len()` of the oldest bytes into `dest`
    pub fn pop_into(&mut self, dest: &mut [u8]) -> usize {
        let cap = self.capacity();
        let n = self.len.min(dest.len());

        let first = n.min(cap - self.read);
        dest[..first].copy_from_slice(&self.buf[self.read..self.read + first]);
        dest[first..n].copy_from_slice(&self.buf[..n - first]);

        self.read = (self.read + n) % cap;
        self.len -= n;
        n
    }

    /// Discard all buffered bytes
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.len = 0;
    }

    /// Replace the backing storage with one of `capacity` bytes
    ///
    /// Buffered bytes are carried over; if they do not fit, the oldest are
    /// dropped and counted.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.capacity() {
            return;
        }

        let mut pending = vec![0u8; self.len];
        self.pop_into(&mut pending);

        self.buf = vec![0u8; capacity].into_boxed_slice();
        self.clear();
        self.push(&pending);
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(ring: &mut RingBuffer) -> Vec<u8> {
        let mut out = vec![0u8; ring.len()];
        let n = ring.pop_into(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn test_push_pop() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.push(b"abc"), 0);
        assert_eq!(ring.len(), 3);

        let mut out = [0u8; 2];
        assert_eq!(ring.pop_into(&mut out), 2);
        assert_eq!(&out, b"ab");
        assert_eq!(drain(&mut ring), b"c");
        assert!(ring.is_empty());
        assert_eq!(ring.pop_into(&mut out), 0);
    }

    #[test]
    fn test_overwrite_drops_oldest() {
        let mut ring = RingBuffer::new(4);
        let data: Vec<u8> = (0..5).collect();
        let lost = ring.push(&data);

        assert_eq!(lost, 1);
        assert_eq!(ring.dropped(), 1);
        assert_eq!(drain(&mut ring), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_overwrite_byte_by_byte() {
        let mut ring = RingBuffer::new(4);
        for b in 0..5u8 {
            ring.push(&[b]);
        }
        assert_eq!(ring.dropped(), 1);
        assert_eq!(drain(&mut ring), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = RingBuffer::new(5);
        ring.push(b"abcd");
        let mut out = [0u8; 3];
        ring.pop_into(&mut out);
        ring.push(b"efgh");
        assert_eq!(ring.dropped(), 0);
        assert_eq!(drain(&mut ring), b"defgh");
    }

    #[test]
    fn test_push_larger_than_capacity() {
        let mut ring = RingBuffer::new(3);
        ring.push(b"xy");
        let lost = ring.push(b"abcdef");
        assert_eq!(lost, 5);
        assert_eq!(drain(&mut ring), b"def");
    }

    #[test]
    fn test_resize_keeps_newest() {
        let mut ring = RingBuffer::new(8);
        ring.push(b"abcdef");
        ring.resize(4);
        assert_eq!(ring.capacity(), 4);
        assert_eq!(ring.dropped(), 2);
        assert_eq!(drain(&mut ring), b"cdef");

        ring.push(b"xy");
        ring.resize(16);
        assert_eq!(drain(&mut ring), b"xy");
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(4);
        ring.push(b"abc");
        ring.clear();
        assert!(ring.is_empty());
        ring.push(b"z");
        assert_eq!(drain(&mut ring), b"z");
    }

    proptest! {
        #[test]
        fn prop_keeps_last_capacity_bytes(
            capacity in 1usize..64,
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..80), 0..10),
        ) {
            let mut ring = RingBuffer::new(capacity);
            let mut all = Vec::new();
            for chunk in &chunks {
                ring.push(chunk);
                all.extend_from_slice(chunk);
            }

            let expected_len = all.len().min(capacity);
            let expected = &all[all.len() - expected_len..];
            prop_assert_eq!(ring.dropped() as usize, all.len() - expected_len);
            prop_assert_eq!(drain(&mut ring), expected.to_vec());
        }
    }
}
