pub mod sync;

/// Split `items` into consecutive chunks of at most `size` elements.
///
/// A `size` of zero is treated as one so callers never loop forever.
pub fn chunks<T>(items: &[T], size: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.max(1))
}
