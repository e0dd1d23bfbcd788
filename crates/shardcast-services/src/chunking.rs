//! Deterministic key ordering and chunk arithmetic.
//!
//! Two nodes holding the same key universe must cut it into identical
//! chunks. That needs the same order (raw byte comparison, duplicates
//! removed) and the same chunk size (a protocol constant, never chosen per
//! request).

use std::ops::Range;

use bytes::Bytes;

/// Merge all key groups into one ascending, duplicate-free list.
///
/// The result does not depend on the iteration order of `groups`.
pub fn sorted_keys<I, G>(groups: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = G>,
    G: IntoIterator<Item = Bytes>,
{
    let mut keys: Vec<Bytes> = groups.into_iter().flatten().collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Number of chunks needed for `len` items: `ceil(len / chunk_size)`.
/// A zero chunk size yields zero chunks.
pub fn max_chunks(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// Half-open item range of chunk `index`.
///
/// Valid indexes are `0..max_chunks(len, chunk_size)`. `index` usually
/// comes from a remote peer and is checked before any arithmetic.
pub fn chunk_bounds(len: usize, chunk_size: usize, index: u32) -> Option<Range<usize>> {
    let index = usize::try_from(index).ok()?;
    if index >= max_chunks(len, chunk_size) {
        return None;
    }

    let start = index * chunk_size;
    let end = start.saturating_add(chunk_size).min(len);
    Some(start..end)
}

/// Slice chunk `index` out of `items`. See [`chunk_bounds`].
pub fn extract_chunk<T>(items: &[T], chunk_size: usize, index: u32) -> Option<&[T]> {
    chunk_bounds(items.len(), chunk_size, index).map(|range| &items[range])
}
