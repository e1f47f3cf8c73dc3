use crate::{BlockHeader, ElementType, Heap, HeapError, Result};

/// Block constructors. Each reserves, formats and publishes in one go.
impl Heap {
    /// Array of `length` references, all null.
    pub fn new_object_array(&self, length: u32) -> Result<usize> {
        self.allocate(BlockHeader::object_array(length))
    }

    pub fn new_primitive_array(&self, element: ElementType, length: u32) -> Result<usize> {
        self.allocate(BlockHeader::primitive_array(element, length))
    }

    /// Dead space of `words` heap words.
    pub fn new_filler(&self, words: usize) -> Result<usize> {
        let length = u32::try_from(words).map_err(|_| HeapError::TooLarge { words })?;
        self.allocate(BlockHeader::filler(length))
    }

    fn allocate(&self, header: BlockHeader) -> Result<usize> {
        let block = self.reserve(header.size_in_words())?;
        // Payload is still zero from the mapping or the last region reset.
        Ok(block.publish(header))
    }
}
