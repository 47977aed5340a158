//! Bounded-memory chunking of sequential streams.
//!
//! [`Chunker`] turns any single-pass iterator into a lazy sequence of
//! `Vec`s holding at most `max` items each. Only the chunk under construction
//! is buffered, so memory stays `O(max)` no matter how long the stream is.
//! Applying it a second time over the chunk stream, with the width of the
//! worker pool, yields *rounds*: groups of chunks dispatched together.
//!
//! ```
//! use chunkline::chunker::{IteratorChunkExt, rounds};
//!
//! let chunks: Vec<Vec<u32>> = (0..250).chunks_of(100).collect();
//! assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![100, 100, 50]);
//!
//! let grouped: Vec<_> = rounds((0..5).chunks_of(1), 2).collect();
//! assert_eq!(grouped.len(), 3);
//! ```

use std::iter::FusedIterator;

/// Lazy iterator of bounded-size chunks over an inner iterator.
///
/// An empty input yields no chunks at all, never a single empty one.
pub struct Chunker<I> {
    inner: I,
    max: usize,
    exhausted: bool,
}

impl<I: Iterator> Chunker<I> {
    /// Chunk `inner` into pieces of at most `max` items (`max` is clamped to 1).
    pub fn new(inner: I, max: usize) -> Self {
        Self {
            inner,
            max: max.max(1),
            exhausted: false,
        }
    }

    /// Maximum chunk size.
    pub fn max(&self) -> usize {
        self.max
    }
}

impl<I: Iterator> Iterator for Chunker<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let mut chunk = Vec::with_capacity(self.max.min(4096));
        while chunk.len() < self.max {
            match self.inner.next() {
                Some(item) => chunk.push(item),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if chunk.is_empty() { None } else { Some(chunk) }
    }
}

impl<I: Iterator> FusedIterator for Chunker<I> {}

/// Extension to chunk any iterator in place.
pub trait IteratorChunkExt: Iterator + Sized {
    /// Equivalent to [`Chunker::new(self, max)`](Chunker::new).
    fn chunks_of(self, max: usize) -> Chunker<Self> {
        Chunker::new(self, max)
    }
}

impl<I: Iterator> IteratorChunkExt for I {}

/// Group a chunk stream into rounds of `width` chunks ("chunks of chunks").
pub fn rounds<I>(chunks: I, width: usize) -> Chunker<I::IntoIter>
where
    I: IntoIterator,
{
    Chunker::new(chunks.into_iter(), width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn empty_source_yields_no_chunks() {
        let mut c = std::iter::empty::<u8>().chunks_of(10);
        assert!(c.next().is_none());
        assert!(c.next().is_none());
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        let sizes: Vec<usize> = (0..200).chunks_of(100).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![100, 100]);
    }

    #[test]
    fn zero_max_is_treated_as_one() {
        assert_eq!((0..3).chunks_of(0).count(), 3);
    }

    #[test]
    fn source_is_pulled_lazily() {
        let pulled = Cell::new(0usize);
        let src = (0..1_000).inspect(|_| pulled.set(pulled.get() + 1));
        let mut chunks = src.chunks_of(10);
        let first = chunks.next().unwrap();
        assert_eq!(first, (0..10).collect::<Vec<_>>());
        assert_eq!(pulled.get(), 10);
    }

    #[test]
    fn rounds_keep_chunk_order() {
        let r: Vec<Vec<Vec<i32>>> = rounds((1..=7).chunks_of(2), 3).collect();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0], vec![vec![1, 2], vec![3, 4], vec![5, 6]]);
        assert_eq!(r[1], vec![vec![7]]);
    }
}
