/// Embedded SQL `IN (...)` lists are limited; chunk any slice into windows
/// of at most 900 entries so a building-pieces query over thousands of
/// owners never becomes a single oversized statement (or, worse, a
/// per-id loop).
pub const CHUNK_SIZE: usize = 900;

pub fn chunks<T>(items: &[T]) -> impl Iterator<Item = &[T]> {
    items.chunks(CHUNK_SIZE)
}
