use std::{
    ptr,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering},
    },
};

use bot::{BlockProbe, HEAP_WORD_SIZE, OffsetTable, OffsetTablePart, Space, VerifyError};
use log::debug;
use parking_lot::Mutex;

use crate::{BlockHeader, HeapError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegionKind {
    Free = 0,
    Regular,
    /// First region of a block larger than half a region.
    StartsHumongous,
    /// Every further region the humongous block covers.
    ContinuesHumongous,
}

impl RegionKind {
    #[inline(always)]
    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Regular,
            2 => Self::StartsHumongous,
            3 => Self::ContinuesHumongous,
            _ => Self::Free,
        }
    }
}

/// A fixed-size slice of the heap with its own view of the offset table.
///
/// Bump allocation records every block in the table before `top` moves
/// past it, so any address below `top` can be resolved.
#[derive(Debug)]
pub struct HeapRegion {
    index: usize,
    bottom: usize,
    end: usize,
    top: AtomicUsize,
    kind: AtomicU8,
    part: OffsetTablePart,
    alloc_lock: Mutex<()>,
}

impl HeapRegion {
    pub(crate) fn new(
        index: usize,
        table: Arc<OffsetTable>,
        bottom: usize,
        end: usize,
    ) -> Result<Self> {
        Ok(Self {
            index,
            bottom,
            end,
            top: AtomicUsize::new(bottom),
            kind: AtomicU8::new(RegionKind::Free as u8),
            part: OffsetTablePart::new(table, bottom, end)?,
            alloc_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn kind(&self) -> RegionKind {
        RegionKind::from_raw(self.kind.load(Ordering::Acquire))
    }

    pub(crate) fn set_kind(&self, kind: RegionKind) {
        self.kind.store(kind as u8, Ordering::Release);
    }

    pub(crate) fn set_top(&self, top: usize) {
        debug_assert!(top >= self.bottom && top <= self.end);
        self.top.store(top, Ordering::Release);
    }

    #[inline]
    pub fn part(&self) -> &OffsetTablePart {
        &self.part
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom && addr < self.end
    }

    pub fn used_bytes(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn free_bytes(&self) -> usize {
        self.end - self.top()
    }

    // ── Headers ───────────────────────────────────────────────────────

    #[inline]
    fn header_word(&self, addr: usize) -> &AtomicU64 {
        assert!(
            self.part.table().contains(addr) && addr % HEAP_WORD_SIZE == 0,
            "{addr:#x} is not a heap word"
        );
        // SAFETY: the table covers exactly the heap mapping, which outlives
        // every region, and `addr` is word aligned inside it
        unsafe { &*(addr as *const AtomicU64) }
    }

    #[inline]
    pub fn header(&self, addr: usize) -> BlockHeader {
        BlockHeader::from_raw(self.header_word(addr).load(Ordering::Acquire))
    }

    pub(crate) fn publish(&self, addr: usize, header: BlockHeader) {
        self.header_word(addr)
            .store(header.to_raw(), Ordering::Release);
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Bumps `top` by `words` and records the block in the table.
    ///
    /// The block's header stays unpublished until [`ReservedBlock::publish`].
    /// `Ok(None)` when the region has no room left.
    pub fn reserve(&self, words: usize) -> Result<Option<ReservedBlock<'_>>> {
        debug_assert!(words > 0);
        if words > u32::MAX as usize {
            return Err(HeapError::TooLarge { words });
        }
        let _guard = self.alloc_lock.lock();
        let top = self.top.load(Ordering::Relaxed);
        let size = words * HEAP_WORD_SIZE;
        if size > self.end - top {
            return Ok(None);
        }
        let new_top = top + size;
        self.part.alloc_block(top, new_top)?;
        self.top.store(new_top, Ordering::Release);
        Ok(Some(ReservedBlock::new(self, top, words)))
    }

    /// Zeroes the used part of the region and its table entries and gives it
    /// a fresh identity. Stale back-chains of a former humongous run go with it.
    pub(crate) fn reset(&mut self) -> Result<()> {
        let top = *self.top.get_mut();
        // SAFETY: `&mut self` excludes every reader of this region and
        // [bottom, top) lies inside the heap mapping
        unsafe { ptr::write_bytes(self.bottom as *mut u8, 0, top - self.bottom) };
        *self.top.get_mut() = self.bottom;
        *self.kind.get_mut() = RegionKind::Free as u8;
        self.part.table().clear(self.bottom..self.end)?;
        self.part.reset();
        debug!("region {} reset, {} bytes cleared", self.index, top - self.bottom);
        Ok(())
    }

    // ── Lookup ────────────────────────────────────────────────────────

    pub fn block_start(&self, addr: usize) -> Option<usize> {
        self.part.block_start(self, addr)
    }

    pub fn block_start_const(&self, addr: usize) -> Option<usize> {
        self.part.block_start_const(self, addr)
    }

    /// Published blocks from the first one overlapping `bottom` up to `top`.
    pub fn blocks(&self) -> Blocks<'_> {
        let top = self.top();
        let next = if self.kind() == RegionKind::ContinuesHumongous && top > self.bottom {
            self.block_start_const(self.bottom).unwrap_or(self.bottom)
        } else {
            self.bottom
        };
        Blocks {
            region: self,
            next,
            top,
        }
    }

    pub fn verify(&self) -> std::result::Result<(), VerifyError> {
        if self.kind() == RegionKind::Free {
            return Ok(());
        }
        self.part.verify(self)?;
        self.part.verify_block_starts(self)
    }
}

impl Space for HeapRegion {
    fn bottom(&self) -> usize {
        self.bottom
    }

    fn end(&self) -> usize {
        self.end
    }

    fn top(&self) -> usize {
        self.top.load(Ordering::Acquire)
    }

    fn block_size(&self, block: usize) -> usize {
        self.header(block).size_in_words()
    }
}

impl BlockProbe for HeapRegion {
    fn is_initialized(&self, addr: usize) -> bool {
        self.header(addr).is_initialized()
    }
}

/// Iterator over `(start, header)` of a region's blocks.
pub struct Blocks<'r> {
    region: &'r HeapRegion,
    next: usize,
    top: usize,
}

impl Iterator for Blocks<'_> {
    type Item = (usize, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.top {
            return None;
        }
        let start = self.next;
        let header = self.region.header(start);
        self.next = start + header.size_in_words() * HEAP_WORD_SIZE;
        Some((start, header))
    }
}

/// Space handed out by [`HeapRegion::reserve`] whose header is not yet
/// visible to lookups.
///
/// Dropping it unpublished turns the space into a filler block.
#[derive(Debug)]
pub struct ReservedBlock<'r> {
    region: &'r HeapRegion,
    addr: usize,
    words: usize,
    published: bool,
}

impl<'r> ReservedBlock<'r> {
    pub(crate) fn new(region: &'r HeapRegion, addr: usize, words: usize) -> Self {
        Self {
            region,
            addr,
            words,
            published: false,
        }
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }

    #[inline]
    pub fn words(&self) -> usize {
        self.words
    }

    /// Makes the block visible. `header` must describe exactly `words`.
    pub fn publish(mut self, header: BlockHeader) -> usize {
        assert_eq!(
            header.size_in_words(),
            self.words,
            "header {header:?} does not match reserved block of {} words",
            self.words
        );
        self.region.publish(self.addr, header);
        self.published = true;
        self.addr
    }
}

impl Drop for ReservedBlock<'_> {
    fn drop(&mut self) {
        if !self.published {
            // reserve() caps blocks at u32::MAX words
            self.region
                .publish(self.addr, BlockHeader::filler(self.words as u32));
        }
    }
}
