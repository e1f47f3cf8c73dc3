/// Geometry of the region a [`crate::OffsetTablePart`] indexes.
///
/// Addresses are plain integers; the table only does arithmetic on them.
pub trait Space {
    fn bottom(&self) -> usize;
    fn end(&self) -> usize;
    /// Current allocation frontier, `bottom <= top <= end`.
    fn top(&self) -> usize;
    /// Size in heap words of the block starting at `block`.
    ///
    /// Only meaningful for genuine block starts; implementations may return
    /// anything for other addresses but must not touch unmapped memory.
    fn block_size(&self, block: usize) -> usize;
}

/// Header probe for blocks that may still be under construction.
pub trait BlockProbe {
    /// Whether `addr` already hosts a formatted block whose size can be read.
    fn is_initialized(&self, addr: usize) -> bool;
}
