//! Region heap driving the block offset table.
//!
//! The heap maps one contiguous range, splits it into equally sized regions
//! and shares a single [`OffsetTable`] between them. Blocks smaller than
//! half a region are bump allocated into the current region; larger ones get
//! a run of free regions of their own, with a filler covering the rest of
//! the last region.

use std::sync::Arc;

use bot::{CARD_SIZE, HEAP_WORD_SIZE, OffsetTable, Space};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    BlockHeader, HeapError, HeapRegion, OS_PAGE_SIZE, RegionKind, ReservedBlock,
    Result, system::Mapping,
};

// ── Heap settings ─────────────────────────────────────────────────────

/// Configuration for the region heap.
#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Total size of the heap in bytes. Must be a multiple of `region_size`.
    pub heap_size: usize,
    /// Size of a region. Must be a multiple of the OS page size, which also
    /// makes it card aligned.
    pub region_size: usize,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            heap_size: 67_108_864, // 64 MB
            region_size: 1_048_576, // 1 MB
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> std::result::Result<(), &'static str> {
        if self.heap_size == 0 || self.region_size == 0 {
            return Err("Sizes must be > 0");
        }
        if !self.region_size.is_multiple_of(OS_PAGE_SIZE) {
            return Err("region_size must match OS page alignment");
        }
        if !self.region_size.is_multiple_of(CARD_SIZE) {
            return Err("region_size must be card aligned");
        }
        if !self.heap_size.is_multiple_of(self.region_size) {
            return Err("heap_size must be a multiple of region_size");
        }
        Ok(())
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.heap_size / self.region_size
    }

    #[inline]
    pub fn region_words(&self) -> usize {
        self.region_size / HEAP_WORD_SIZE
    }

    /// Blocks of at least this many words are humongous.
    #[inline]
    pub fn humongous_threshold_words(&self) -> usize {
        self.region_words() / 2
    }
}

// ── Heap ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Heap {
    settings: HeapSettings,
    table: Arc<OffsetTable>,
    regions: Box<[HeapRegion]>,
    /// Region currently bump allocated into. Held while claiming regions.
    current: Mutex<Option<usize>>,
    // Dropped last: regions hand out references into it.
    memory: Mapping,
}

impl Heap {
    pub fn new(settings: HeapSettings) -> Result<Self> {
        settings.validate().map_err(HeapError::InvalidSettings)?;

        let memory = Mapping::new(settings.heap_size).ok_or(HeapError::MapFailed {
            size: settings.heap_size,
        })?;
        let start = memory.start();
        let table = Arc::new(OffsetTable::new(start, settings.heap_size)?);

        let regions = (0..settings.region_count())
            .map(|index| {
                let bottom = start + index * settings.region_size;
                HeapRegion::new(index, table.clone(), bottom, bottom + settings.region_size)
            })
            .collect::<Result<Box<[_]>>>()?;

        debug!(
            "heap [{start:#x}, {:#x}) with {} regions of {} bytes, {} table entries",
            start + settings.heap_size,
            regions.len(),
            settings.region_size,
            table.len()
        );

        Ok(Self {
            settings,
            table,
            regions,
            current: Mutex::new(None),
            memory,
        })
    }

    #[inline]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline]
    pub fn table(&self) -> &Arc<OffsetTable> {
        &self.table
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.memory.start()
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.memory.start() + self.memory.len()
    }

    #[inline]
    pub fn regions(&self) -> &[HeapRegion] {
        &self.regions
    }

    #[inline]
    pub fn region(&self, index: usize) -> Option<&HeapRegion> {
        self.regions.get(index)
    }

    pub fn region_for(&self, addr: usize) -> Option<&HeapRegion> {
        if addr < self.start() || addr >= self.end() {
            return None;
        }
        self.regions
            .get((addr - self.start()) / self.settings.region_size)
    }

    pub fn used_bytes(&self) -> usize {
        self.regions.iter().map(HeapRegion::used_bytes).sum()
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Reserves a block of `words`, humongous when it reaches half a region.
    pub fn reserve(&self, words: usize) -> Result<ReservedBlock<'_>> {
        assert!(words > 0, "blocks hold at least their header");
        if words > u32::MAX as usize {
            return Err(HeapError::TooLarge { words });
        }
        if words >= self.settings.humongous_threshold_words() {
            return self.reserve_humongous(words);
        }

        let mut current = self.current.lock();
        loop {
            if let Some(index) = *current {
                if let Some(block) = self.regions[index].reserve(words)? {
                    return Ok(block);
                }
            }
            let index = self.claim_run(1).ok_or(HeapError::OutOfMemory { words })?;
            self.regions[index].set_kind(RegionKind::Regular);
            debug!("region {index} claimed for bump allocation");
            *current = Some(index);
        }
    }

    fn reserve_humongous(&self, words: usize) -> Result<ReservedBlock<'_>> {
        let size = words * HEAP_WORD_SIZE;
        let count = size.div_ceil(self.settings.region_size);

        let _current = self.current.lock();
        let first = self.claim_run(count).ok_or(HeapError::OutOfMemory { words })?;
        let run = &self.regions[first..first + count];
        let start = &run[0];
        let obj_top = start.bottom() + size;
        let fill_words = (run[count - 1].end() - obj_top) / HEAP_WORD_SIZE;

        for region in &run[1..] {
            region.set_kind(RegionKind::ContinuesHumongous);
            region.part().set_object_can_span(true);
        }
        start.set_kind(RegionKind::StartsHumongous);
        start.part().set_for_starts_humongous(obj_top, fill_words)?;
        if fill_words > 0 {
            start.publish(obj_top, BlockHeader::filler(fill_words as u32));
        }
        for region in run {
            region.set_top(region.end());
        }

        debug!(
            "humongous block of {words} words in regions {first}..{}, {fill_words} filler words",
            first + count
        );
        Ok(ReservedBlock::new(start, start.bottom(), words))
    }

    /// First run of `count` free regions. Callers hold `current`.
    fn claim_run(&self, count: usize) -> Option<usize> {
        let mut run = 0;
        for (index, region) in self.regions.iter().enumerate() {
            if region.kind() == RegionKind::Free {
                run += 1;
                if run == count {
                    return Some(index + 1 - count);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Returns a regular region, or a whole humongous run when given its
    /// first region, to the free pool.
    pub fn reset_region(&mut self, index: usize) -> Result<()> {
        let kind = self.regions[index].kind();
        let count = match kind {
            RegionKind::Regular => 1,
            RegionKind::StartsHumongous => {
                1 + self.regions[index + 1..]
                    .iter()
                    .take_while(|r| r.kind() == RegionKind::ContinuesHumongous)
                    .count()
            }
            RegionKind::Free | RegionKind::ContinuesHumongous => {
                return Err(HeapError::RegionState {
                    index,
                    kind,
                    expected: RegionKind::Regular,
                });
            }
        };

        let current = self.current.get_mut();
        if *current == Some(index) {
            *current = None;
        }
        for region in &mut self.regions[index..index + count] {
            region.reset()?;
        }
        Ok(())
    }

    // ── Lookup ────────────────────────────────────────────────────────

    /// Start of the block containing `addr`, probing headers on the way.
    pub fn block_start(&self, addr: usize) -> Option<usize> {
        self.region_for(addr)?.block_start(addr)
    }

    /// Start of the block containing `addr` in a region no one is
    /// allocating into.
    pub fn block_start_const(&self, addr: usize) -> Option<usize> {
        self.region_for(addr)?.block_start_const(addr)
    }

    pub fn verify(&self) -> Result<()> {
        for region in self.regions.iter() {
            if let Err(source) = region.verify() {
                warn!(
                    "region {} ({:?}) failed verification: {source}",
                    region.index(),
                    region.kind()
                );
                return Err(HeapError::Verify {
                    region: region.index(),
                    source,
                });
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
