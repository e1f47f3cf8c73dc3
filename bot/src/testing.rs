use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use crate::{BlockProbe, HEAP_WORD_SIZE, Space};

/// In-memory block layout for exercising lookups without a heap.
#[derive(Debug, Clone)]
pub struct FakeSpace {
    bottom: usize,
    end: usize,
    top: usize,
    blocks: Arc<BTreeMap<usize, usize>>,
    pending: Arc<HashSet<usize>>,
}

impl FakeSpace {
    pub fn new(bottom: usize, end: usize) -> Self {
        Self {
            bottom,
            end,
            top: bottom,
            blocks: Arc::default(),
            pending: Arc::default(),
        }
    }

    /// Appends a formatted block of `words` at `top`.
    pub fn push(&mut self, words: usize) -> usize {
        let start = self.top;
        assert!(words > 0);
        assert!(start + words * HEAP_WORD_SIZE <= self.end, "space full");
        Arc::make_mut(&mut self.blocks).insert(start, words);
        self.top = start + words * HEAP_WORD_SIZE;
        start
    }

    /// Appends a block whose header is not published yet.
    pub fn push_uninitialized(&mut self, words: usize) -> usize {
        let start = self.push(words);
        Arc::make_mut(&mut self.pending).insert(start);
        start
    }

    /// Same blocks seen through different region bounds.
    pub fn window(&self, bottom: usize, end: usize) -> Self {
        Self {
            bottom,
            end,
            top: self.top.clamp(bottom, end),
            blocks: self.blocks.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl Space for FakeSpace {
    fn bottom(&self) -> usize {
        self.bottom
    }

    fn end(&self) -> usize {
        self.end
    }

    fn top(&self) -> usize {
        self.top
    }

    /// Addresses inside a block read as one-word garbage.
    fn block_size(&self, block: usize) -> usize {
        self.blocks.get(&block).copied().unwrap_or(1)
    }
}

impl BlockProbe for FakeSpace {
    fn is_initialized(&self, addr: usize) -> bool {
        self.blocks.contains_key(&addr) && !self.pending.contains(&addr)
    }
}
