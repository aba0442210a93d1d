//! Splitting blob content into transport-sized chunks.
//!
//! The remote service rejects upload frames larger than its negotiated
//! `data_chunk_max_size`, so content is sliced client-side before anything is
//! written to a stream. Slicing operates on [`Bytes`], so every chunk is a
//! reference-counted view into the caller's buffer rather than a copy.
//!
//! All sequences produced here are lazy, finite and consumed once:
//!
//! - [`chunks`] - one byte sequence into `ceil(len / max)` chunks.
//! - [`tagged_chunks`] - `(key, content)` pairs into `(key, chunk)` pairs;
//!   a chunk never spans two keys.
//! - [`chunk_stream`] / [`tagged_chunk_stream`] - the same over content that
//!   is produced incrementally.
//!
//! Zero-length content yields no chunks.

use bytes::Bytes;
use core::iter::FusedIterator;
use core::num::NonZeroUsize;
use futures::{Stream, StreamExt, stream};

/// Splits `content` into chunks of at most `max` bytes, in order.
pub fn chunks(content: Bytes, max: NonZeroUsize) -> Chunks {
    Chunks {
        remaining: content,
        max: max.get(),
    }
}

/// Splits each `(key, content)` pair into `(key, chunk)` pairs of at most
/// `max` bytes, preserving input order.
pub fn tagged_chunks<K, I>(items: I, max: NonZeroUsize) -> TaggedChunks<I::IntoIter, K>
where
    I: IntoIterator<Item = (K, Bytes)>,
    K: Clone,
{
    TaggedChunks {
        items: items.into_iter(),
        current: None,
        max,
    }
}

/// Chunks every piece produced by `content` as it arrives.
pub fn chunk_stream<S>(content: S, max: NonZeroUsize) -> impl Stream<Item = Bytes>
where
    S: Stream<Item = Bytes>,
{
    content.flat_map(move |piece| stream::iter(chunks(piece, max)))
}

/// Chunks every `(key, content)` pair produced by `items` as it arrives.
pub fn tagged_chunk_stream<K, S>(items: S, max: NonZeroUsize) -> impl Stream<Item = (K, Bytes)>
where
    S: Stream<Item = (K, Bytes)>,
    K: Clone,
{
    items.flat_map(move |(key, piece)| stream::iter(tagged_chunks([(key, piece)], max)))
}

/// Iterator returned by [`chunks`].
#[derive(Debug, Clone)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Chunks {
    remaining: Bytes,
    max: usize,
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let len = self.remaining.len().min(self.max);
        Some(self.remaining.split_to(len))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len().div_ceil(self.max);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}
impl FusedIterator for Chunks {}

/// Iterator returned by [`tagged_chunks`].
#[derive(Debug)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct TaggedChunks<I, K> {
    items: I,
    current: Option<(K, Chunks)>,
    max: NonZeroUsize,
}

impl<I, K> Iterator for TaggedChunks<I, K>
where
    I: Iterator<Item = (K, Bytes)>,
    K: Clone,
{
    type Item = (K, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, pieces)) = &mut self.current {
                if let Some(chunk) = pieces.next() {
                    return Some((key.clone(), chunk));
                }
            }
            let (key, content) = self.items.next()?;
            self.current = Some((key, chunks(content, self.max)));
        }
    }
}

impl<I, K> FusedIterator for TaggedChunks<I, K>
where
    I: FusedIterator<Item = (K, Bytes)>,
    K: Clone,
{
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn content(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    #[test]
    fn concatenation_reproduces_the_input() {
        for len in [0, 1, 7, 8, 9, 63, 64, 65, 1000] {
            for m in [1, 3, 8, 64, 4096] {
                let input = content(len);
                let pieces: Vec<Bytes> = chunks(input.clone(), max(m)).collect();

                assert_eq!(pieces.len(), len.div_ceil(m), "len={len} max={m}");
                assert!(pieces.iter().all(|c| !c.is_empty() && c.len() <= m));
                assert_eq!(pieces.concat(), input.to_vec());
            }
        }
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert_eq!(chunks(Bytes::new(), max(16)).count(), 0);
        assert_eq!(chunks(Bytes::new(), max(16)).len(), 0);
    }

    #[test]
    fn size_hint_is_exact() {
        let mut it = chunks(content(10), max(4));
        assert_eq!(it.len(), 3);
        it.next();
        assert_eq!(it.len(), 2);
    }

    #[test]
    fn tagged_chunks_never_merge_keys() {
        let items = vec![("a", content(3)), ("b", content(2)), ("c", content(9))];
        let out: Vec<(&str, Bytes)> = tagged_chunks(items, max(4)).collect();

        let keys: Vec<&str> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["a", "b", "c", "c", "c"]);
        assert_eq!(out[0].1.len(), 3);
        assert_eq!(out[1].1.len(), 2);
        assert_eq!(out[2].1.len(), 4);
        assert_eq!(out[4].1.len(), 1);
    }

    #[test]
    fn tagged_chunks_skip_empty_content() {
        let items = vec![("a", Bytes::new()), ("b", content(1)), ("c", Bytes::new())];
        let keys: Vec<&str> = tagged_chunks(items, max(4)).map(|(k, _)| k).collect();
        assert_eq!(keys, ["b"]);
    }

    #[test]
    fn tagged_chunks_reassemble_per_key() {
        let a = content(130);
        let b = content(17);
        let items = vec![(1_u8, a.clone()), (2_u8, b.clone())];

        let mut got_a = Vec::new();
        let mut got_b = Vec::new();
        for (key, chunk) in tagged_chunks(items, max(32)) {
            match key {
                1 => got_a.extend_from_slice(&chunk),
                _ => got_b.extend_from_slice(&chunk),
            }
        }
        assert_eq!(got_a, a.to_vec());
        assert_eq!(got_b, b.to_vec());
    }

    #[tokio::test]
    async fn chunk_stream_splits_each_piece() {
        let pieces = stream::iter(vec![content(5), Bytes::new(), content(2)]);
        let out: Vec<Bytes> = chunk_stream(pieces, max(2)).collect().await;
        let sizes: Vec<usize> = out.iter().map(Bytes::len).collect();
        assert_eq!(sizes, [2, 2, 1, 2]);
    }

    #[tokio::test]
    async fn tagged_chunk_stream_keeps_keys() {
        let pieces = stream::iter(vec![("x", content(3)), ("y", content(1))]);
        let out: Vec<(&str, usize)> = tagged_chunk_stream(pieces, max(2))
            .map(|(k, c)| (k, c.len()))
            .collect()
            .await;
        assert_eq!(out, [("x", 2), ("x", 1), ("y", 1)]);
    }
}
