//! Fixed-size staging block that aggregates caller writes into whole
//! hardware transfer blocks.

/// One hardware transfer block being filled.
///
/// Always satisfies `offset() + remaining() == block_size()`.
pub(crate) struct StagingBuffer {
    buf: Box<[u8]>,
    offset: usize,
}

impl StagingBuffer {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            buf: vec![0u8; block_size].into_boxed_slice(),
            offset: 0,
        }
    }

    #[inline]
    pub(crate) fn block_size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes staged so far.
    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    /// Free space left in the block.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.offset == self.buf.len()
    }

    /// Largest input a single write may carry: the rest of this block plus
    /// one whole block after a flush.
    #[inline]
    pub(crate) fn max_write_len(&self) -> usize {
        self.remaining() + self.buf.len()
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    pub(crate) fn fill(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf[self.offset..self.offset + n].copy_from_slice(&data[..n]);
        self.offset += n;
        n
    }

    /// Gives back the last `n` staged bytes (used when a flush fails).
    pub(crate) fn unfill(&mut self, n: usize) {
        debug_assert!(n <= self.offset);
        self.offset -= n.min(self.offset);
    }

    /// The full block, ready for the sink.
    pub(crate) fn block(&self) -> &[u8] {
        &self.buf
    }

    /// Empties the block.
    pub(crate) fn reset(&mut self) {
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_until_full() {
        let mut staging = StagingBuffer::new(8);
        assert_eq!(staging.remaining(), 8);
        assert_eq!(staging.max_write_len(), 16);

        assert_eq!(staging.fill(&[1, 2, 3]), 3);
        assert_eq!(staging.offset(), 3);
        assert_eq!(staging.remaining(), 5);
        assert_eq!(staging.max_write_len(), 13);

        assert_eq!(staging.fill(&[4, 5, 6, 7, 8, 9, 10]), 5);
        assert!(staging.is_full());
        assert_eq!(staging.block(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(staging.fill(&[11]), 0);

        staging.reset();
        assert_eq!(staging.offset(), 0);
        assert_eq!(staging.remaining(), staging.block_size());
    }

    #[test]
    fn test_unfill_restores_offset() {
        let mut staging = StagingBuffer::new(4);
        staging.fill(&[1]);
        let taken = staging.fill(&[2, 3, 4]);
        assert!(staging.is_full());
        staging.unfill(taken);
        assert_eq!(staging.offset(), 1);
        assert_eq!(staging.remaining(), 3);
    }

    #[test]
    fn test_offset_plus_remaining_is_block_size() {
        let mut staging = StagingBuffer::new(188);
        for chunk in [0usize, 1, 50, 100, 37] {
            staging.fill(&vec![0x47; chunk]);
            assert_eq!(staging.offset() + staging.remaining(), 188);
        }
    }
}
