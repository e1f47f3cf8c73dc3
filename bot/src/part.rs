//! Per-region view over the shared [`OffsetTable`].
//!
//! A lookup runs in two phases:
//!
//! 1. Walk the table backwards from the card of the queried address,
//!    following back-skip entries until a direct offset names a block start
//!    at or before the card start.
//! 2. Walk forward block by block, using the region's block sizes, until the
//!    block containing the address is found.
//!
//! The allocator keeps the table current through [`OffsetTablePart::alloc_block`];
//! lookups only read entries up to `next_offset_index - 1`, the last card the
//! allocator has published.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use log::{debug, trace};

use crate::{
    BlockProbe, CARD_SIZE, CARD_WORDS, Entry, HEAP_WORD_SIZE, LOG_CARD_SIZE,
    N_POWERS, OffsetTable, OffsetTableError, Result, Space,
    constants::{
        align_up_to_card, is_card_aligned, pointer_delta, power_to_cards_back,
    },
};

#[derive(Debug)]
pub struct OffsetTablePart {
    table: Arc<OffsetTable>,
    bottom: usize,
    end: usize,
    bottom_index: usize,
    last_index: usize,
    /// First card boundary not yet covered by an allocated block.
    next_offset_threshold: AtomicUsize,
    /// Card index of `next_offset_threshold`.
    next_offset_index: AtomicUsize,
    /// Set for regions that continue a humongous block; their first card
    /// points back into the region where the block starts.
    object_can_span: AtomicBool,
}

impl OffsetTablePart {
    /// Creates the view for `[bottom, end)` and resets its first entry.
    pub fn new(table: Arc<OffsetTable>, bottom: usize, end: usize) -> Result<Self> {
        if !is_card_aligned(bottom) {
            return Err(OffsetTableError::Misaligned {
                what: "region bottom",
                value: bottom,
            });
        }
        if !is_card_aligned(end) {
            return Err(OffsetTableError::Misaligned {
                what: "region end",
                value: end,
            });
        }
        if bottom >= end {
            return Err(OffsetTableError::EmptyRange { start: bottom, end });
        }
        let bottom_index = table.index_for(bottom)?;
        let last_index = table.index_for(end - 1)?;

        let part = Self {
            table,
            bottom,
            end,
            bottom_index,
            last_index,
            next_offset_threshold: AtomicUsize::new(0),
            next_offset_index: AtomicUsize::new(0),
            object_can_span: AtomicBool::new(false),
        };
        part.reset();
        Ok(part)
    }

    #[inline]
    pub fn table(&self) -> &Arc<OffsetTable> {
        &self.table
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.bottom
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Card index of the region's first card.
    #[inline]
    pub fn bottom_index(&self) -> usize {
        self.bottom_index
    }

    /// Card index of the region's last card.
    #[inline]
    pub fn last_index(&self) -> usize {
        self.last_index
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom && addr < self.end
    }

    #[inline]
    pub fn next_offset_index(&self) -> usize {
        self.next_offset_index.load(Ordering::Acquire)
    }

    #[inline]
    pub fn next_offset_threshold(&self) -> usize {
        self.next_offset_threshold.load(Ordering::Acquire)
    }

    #[inline]
    pub fn object_can_span(&self) -> bool {
        self.object_can_span.load(Ordering::Acquire)
    }

    pub fn set_object_can_span(&self, can_span: bool) {
        self.object_can_span.store(can_span, Ordering::Release);
    }

    // ── Reset ─────────────────────────────────────────────────────────

    /// Gives the region a fresh identity: the first card gets offset 0 and
    /// the threshold moves back to the second card.
    pub fn reset(&self) {
        self.table.set_raw(self.bottom_index, 0);
        self.object_can_span.store(false, Ordering::Release);
        self.initialize_threshold();
    }

    /// Moves the threshold back to the second card without touching entries.
    pub fn initialize_threshold(&self) -> usize {
        let index = self.bottom_index + 1;
        let threshold = self.table.address_for_index_raw(index);
        self.next_offset_threshold
            .store(threshold, Ordering::Release);
        self.next_offset_index.store(index, Ordering::Release);
        threshold
    }

    // ── Lookup ────────────────────────────────────────────────────────

    /// Start of the block containing `addr`, `None` outside `[bottom, end)`.
    ///
    /// Addresses at or past `top` answer `top`. A block that is still being
    /// formatted (its header probe fails) is returned as-is: it is the best
    /// known answer and must not be inspected further. Walking forward over
    /// several blocks refines the entries it crosses.
    pub fn block_start<S>(&self, space: &S, addr: usize) -> Option<usize>
    where
        S: Space + BlockProbe,
    {
        if !self.contains(addr) {
            return None;
        }
        debug_assert_eq!(space.bottom(), self.bottom);
        let q = self.block_at_or_preceding(addr, Some(self.max_valid_index()));
        Some(self.forward_to_block_containing_addr(space, q, addr))
    }

    /// Read-only [`Self::block_start`] for fully formed regions.
    ///
    /// Never probes headers and never writes the table.
    pub fn block_start_const<S: Space>(&self, space: &S, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        let top = space.top();
        if addr >= top {
            return Some(top);
        }
        let q = self.block_at_or_preceding(addr, Some(self.max_valid_index()));
        let n = block_end(space, q);
        Some(self.forward_to_block_containing_addr_const(space, q, n, addr))
    }

    #[inline]
    fn max_valid_index(&self) -> usize {
        self.next_offset_index() - 1
    }

    /// Phase 1: a block start at or before the start of `addr`'s card.
    ///
    /// With `max_index` the walk starts no later than that card; addresses
    /// past the allocation frontier reuse the last published entry.
    pub fn block_at_or_preceding(&self, addr: usize, max_index: Option<usize>) -> usize {
        self.walk_back(addr, max_index).0
    }

    /// Phase 1 returning the number of back-skips taken as well.
    fn walk_back(&self, addr: usize, max_index: Option<usize>) -> (usize, usize) {
        debug_assert!(
            self.object_can_span() || self.table.get_raw(self.bottom_index) == 0,
            "object crossed region boundary, found offset {} instead of 0",
            self.table.get_raw(self.bottom_index)
        );

        let mut index = self.table.index_for_raw(addr);
        if let Some(max_index) = max_index {
            index = index.min(max_index);
        }
        let mut q = self.table.address_for_index_raw(index);
        let mut hops = 0;

        loop {
            match self.decode(index) {
                Entry::Direct(words) => {
                    return (q - words as usize * HEAP_WORD_SIZE, hops);
                }
                skip @ Entry::SkipBack(_) => {
                    let cards_back = skip.cards_back();
                    index = self.step_back(index, cards_back);
                    q -= cards_back << LOG_CARD_SIZE;
                    hops += 1;
                }
            }
        }
    }

    #[inline]
    fn decode(&self, index: usize) -> Entry {
        let raw = self.table.get_raw(index);
        match Entry::decode(raw) {
            Some(entry) => entry,
            None => panic!(
                "corrupted block offset table: card {index} holds {raw}"
            ),
        }
    }

    #[inline]
    fn step_back(&self, index: usize, cards_back: usize) -> usize {
        let floor = if self.object_can_span() {
            0
        } else {
            self.bottom_index
        };
        match index.checked_sub(cards_back) {
            Some(prev) if prev >= floor => prev,
            _ => panic!(
                "corrupted block offset table: card {index} skips back \
                 {cards_back} cards past card {floor} (region [{:#x}, {:#x}))",
                self.bottom, self.end
            ),
        }
    }

    /// Phase 2, probing headers and refining entries on the way.
    fn forward_to_block_containing_addr<S>(&self, space: &S, q: usize, addr: usize) -> usize
    where
        S: Space + BlockProbe,
    {
        let top = space.top();
        if addr >= top {
            return top;
        }
        if !space.is_initialized(q) {
            return q;
        }
        let n = block_end(space, q);
        // A card-start query with one block per card stops right here.
        if n <= addr {
            self.forward_to_block_containing_addr_slow(space, q, n, addr)
        } else {
            q
        }
    }

    /// Walks from the block `[q, n)` to the one containing `addr`.
    ///
    /// The walk typically crosses blocks the allocator recorded as one chunk
    /// (a TLAB later split into objects). Every card boundary it crosses is
    /// re-recorded for the block that actually covers it.
    fn forward_to_block_containing_addr_slow<S>(
        &self,
        space: &S,
        mut q: usize,
        mut n: usize,
        addr: usize,
    ) -> usize
    where
        S: Space + BlockProbe,
    {
        let n_index = self.table.index_for_raw(n);
        let mut next_index =
            n_index + usize::from(!self.table.is_card_boundary(n));
        let mut next_boundary = self.table.address_for_index_raw(next_index);

        while n <= addr {
            q = n;
            if !space.is_initialized(q) {
                return q;
            }
            n = block_end(space, q);
            if n > next_boundary {
                trace!(
                    "refining cards from {next_index} for block [{q:#x}, {n:#x})"
                );
                if let Err(err) = self.alloc_block_work(
                    &mut next_boundary,
                    &mut next_index,
                    q,
                    n,
                ) {
                    panic!("refining block [{q:#x}, {n:#x}) failed: {err}");
                }
            }
        }
        debug_assert!(q <= addr && addr < n);
        q
    }

    fn forward_to_block_containing_addr_const<S: Space>(
        &self,
        space: &S,
        mut q: usize,
        mut n: usize,
        addr: usize,
    ) -> usize {
        while n <= addr {
            q = n;
            n = block_end(space, q);
        }
        debug_assert!(q <= addr && addr < n);
        q
    }

    // ── Maintenance ───────────────────────────────────────────────────

    /// Records a freshly bump-allocated block `[blk_start, blk_end)`.
    ///
    /// Blocks must be recorded in address order without gaps, the way a
    /// bump allocator produces them. Only blocks reaching past the current
    /// threshold touch the table.
    pub fn alloc_block(&self, blk_start: usize, blk_end: usize) -> Result<()> {
        if blk_end <= blk_start {
            return Err(OffsetTableError::AddressOrder {
                high: blk_end,
                low: blk_start,
            });
        }
        self.table.index_for(blk_start)?;

        let mut threshold = self.next_offset_threshold();
        if blk_end > threshold {
            let mut index = self.next_offset_index();
            self.alloc_block_work(&mut threshold, &mut index, blk_start, blk_end)?;
            self.next_offset_threshold
                .store(threshold, Ordering::Release);
            self.next_offset_index.store(index, Ordering::Release);
        }
        Ok(())
    }

    #[inline]
    pub fn alloc_block_words(&self, blk_start: usize, words: usize) -> Result<()> {
        self.alloc_block(blk_start, blk_start + words * HEAP_WORD_SIZE)
    }

    /// Writes the entries for a block crossing `threshold` and advances
    /// `threshold`/`index` past the block's last card.
    fn alloc_block_work(
        &self,
        threshold: &mut usize,
        index: &mut usize,
        blk_start: usize,
        blk_end: usize,
    ) -> Result<()> {
        debug_assert!(blk_end > *threshold);
        debug_assert_eq!(self.table.index_for_raw(*threshold), *index);
        if blk_start > *threshold {
            return Err(OffsetTableError::AddressOrder {
                high: *threshold,
                low: blk_start,
            });
        }

        if pointer_delta(*threshold, blk_start) == CARD_WORDS {
            // Block starts on the previous card's boundary. That only happens
            // for the region's first card, which already holds offset 0.
            self.table.set(*index, Entry::SkipBack(0).encode())?;
        } else {
            self.table.set_offset(*index, *threshold, blk_start)?;
        }

        let end_index = self.table.index_for(blk_end - 1)?;
        if *index < end_index {
            self.set_remainder_to_point_to_start_incl(*index + 1, end_index)?;
        }

        *index = end_index + 1;
        *threshold = self.table.address_for_index_raw(end_index) + CARD_SIZE;
        Ok(())
    }

    /// Back-chains `[start_card, end_card]` to the direct entry at
    /// `start_card - 1`.
    ///
    /// Cards up to `BASE - 1` past the direct entry skip back one card,
    /// cards up to `BASE^2 - 1` past it skip back `BASE`, and so on, so a
    /// lookup anywhere in a block spanning `k` cards takes `O(log k)` hops.
    fn set_remainder_to_point_to_start_incl(
        &self,
        start_card: usize,
        end_card: usize,
    ) -> Result<()> {
        if start_card > end_card {
            return Ok(());
        }
        debug_assert!(start_card > 0);
        trace!("back-chaining cards {start_card}..={end_card}");

        let mut start_card_for_region = start_card;
        for power in 0..N_POWERS {
            // -1 so the card with the direct offset is counted, another -1
            // so the reach ends before the next power's range.
            let reach = start_card - 1 + (power_to_cards_back(power + 1) - 1);
            let value = Entry::SkipBack(power as u8).encode();
            if reach >= end_card {
                return self.table.set_range(start_card_for_region, end_card, value);
            }
            self.table.set_range(start_card_for_region, reach, value)?;
            start_card_for_region = reach + 1;
        }
        debug_assert!(start_card_for_region > end_card);
        Ok(())
    }

    /// Re-records the block starting at `blk_start`, e.g. after it moved.
    ///
    /// Recording the same block twice leaves the table unchanged. The
    /// frontier only ever grows, so blocks relocated below it keep it.
    pub fn set_offset_for_block<S: Space>(&self, space: &S, blk_start: usize) -> Result<()> {
        if !self.contains(blk_start) {
            return Err(OffsetTableError::AddressOutOfRange {
                addr: blk_start,
                start: self.bottom,
                end: self.end,
            });
        }
        let words = space.block_size(blk_start);
        if words == 0 {
            return Err(OffsetTableError::EmptyRange {
                start: blk_start,
                end: blk_start,
            });
        }
        self.update_for_block(blk_start, blk_start + words * HEAP_WORD_SIZE)
    }

    /// Records `[blk_start, blk_end)` independent of the allocation threshold.
    pub fn update_for_block(&self, blk_start: usize, blk_end: usize) -> Result<()> {
        if blk_end <= blk_start {
            return Err(OffsetTableError::AddressOrder {
                high: blk_end,
                low: blk_start,
            });
        }
        let boundary = align_up_to_card(blk_start);
        if blk_end <= boundary {
            // Block lies within a single card and starts no card.
            return Ok(());
        }

        let index = self.table.index_for(boundary)?;
        self.table.set_offset(index, boundary, blk_start)?;
        let end_index = self.table.index_for(blk_end - 1)?;
        if index < end_index {
            self.set_remainder_to_point_to_start_incl(index + 1, end_index)?;
        }

        self.next_offset_index
            .fetch_max(end_index + 1, Ordering::AcqRel);
        self.next_offset_threshold.fetch_max(
            self.table.address_for_index_raw(end_index) + CARD_SIZE,
            Ordering::AcqRel,
        );
        Ok(())
    }

    /// Lays out a humongous block `[bottom, obj_top)` followed by an optional
    /// filler of `fill_words`. The block may run into following regions.
    pub fn set_for_starts_humongous(&self, obj_top: usize, fill_words: usize) -> Result<()> {
        self.reset();
        self.alloc_block(self.bottom, obj_top)?;
        if fill_words > 0 {
            self.alloc_block_words(obj_top, fill_words)?;
        }
        debug!(
            "humongous block [{:#x}, {obj_top:#x}) recorded, {fill_words} filler words",
            self.bottom
        );
        Ok(())
    }

    fn check_region_index(&self, index: usize) -> Result<()> {
        if index < self.bottom_index || index > self.last_index {
            return Err(OffsetTableError::IndexOutOfRange {
                index,
                first: self.bottom_index,
                last: self.last_index,
            });
        }
        Ok(())
    }

    /// Fills the region's cards `[left, right]` with a raw entry.
    pub fn set_offset_range(&self, left: usize, right: usize, value: u8) -> Result<()> {
        if left > right {
            return Err(OffsetTableError::IndexOrder { left, right });
        }
        self.check_region_index(left)?;
        self.check_region_index(right)?;
        self.table.set_range(left, right, value)
    }

    pub fn set_offset(&self, index: usize, value: u8) -> Result<()> {
        self.check_region_index(index)?;
        self.table.set(index, value)
    }

    /// Stores the word distance `high - low` at the region's card `index`.
    pub fn set_offset_between(&self, index: usize, high: usize, low: usize) -> Result<()> {
        self.check_region_index(index)?;
        self.table.set_offset(index, high, low)
    }
}

/// End of the block starting at `block`.
#[inline]
pub(crate) fn block_end<S: Space>(space: &S, block: usize) -> usize {
    let words = space.block_size(block);
    assert!(words > 0, "zero-sized block at {block:#x}");
    block + words * HEAP_WORD_SIZE
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{BASE, testing::FakeSpace};

    const BOTTOM: usize = 0x2000_0000;

    fn setup(cards: usize) -> (FakeSpace, OffsetTablePart) {
        let table =
            Arc::new(OffsetTable::new(BOTTOM, cards * CARD_SIZE).unwrap());
        let part =
            OffsetTablePart::new(table, BOTTOM, BOTTOM + cards * CARD_SIZE)
                .unwrap();
        (FakeSpace::new(BOTTOM, BOTTOM + cards * CARD_SIZE), part)
    }

    fn alloc(space: &mut FakeSpace, part: &OffsetTablePart, words: usize) -> usize {
        let start = space.push(words);
        part.alloc_block_words(start, words).unwrap();
        start
    }

    #[test]
    fn new_rejects_bad_bounds() {
        let table = Arc::new(OffsetTable::new(BOTTOM, 8 * CARD_SIZE).unwrap());
        assert!(matches!(
            OffsetTablePart::new(table.clone(), BOTTOM + 8, BOTTOM + CARD_SIZE),
            Err(OffsetTableError::Misaligned { .. })
        ));
        assert!(matches!(
            OffsetTablePart::new(table.clone(), BOTTOM, BOTTOM),
            Err(OffsetTableError::EmptyRange { .. })
        ));
        assert!(matches!(
            OffsetTablePart::new(table, BOTTOM, BOTTOM + 9 * CARD_SIZE),
            Err(OffsetTableError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn reset_zeroes_bottom_and_rewinds_threshold() {
        let (mut space, part) = setup(8);
        alloc(&mut space, &part, 3 * CARD_WORDS);
        assert_eq!(part.next_offset_index(), 3);

        part.table().set_raw(0, 7);
        part.reset();
        assert_eq!(part.table().get(0), Ok(0));
        assert_eq!(part.next_offset_index(), 1);
        assert_eq!(part.next_offset_threshold(), BOTTOM + CARD_SIZE);
    }

    #[test]
    fn single_block_answers_its_start_everywhere() {
        let (mut space, part) = setup(8);
        let words = 100;
        let start = alloc(&mut space, &part, words);
        assert_eq!(start, BOTTOM);

        for offset in 0..words {
            let addr = BOTTOM + offset * HEAP_WORD_SIZE;
            assert_eq!(part.block_start(&space, addr), Some(BOTTOM), "{addr:#x}");
            assert_eq!(part.block_start_const(&space, addr), Some(BOTTOM));
        }
    }

    #[test]
    fn small_blocks_sharing_cards() {
        let (mut space, part) = setup(8);
        let mut starts = Vec::new();
        for i in 0..40 {
            starts.push(alloc(&mut space, &part, 3 + i % 7));
        }
        let top = space.top();
        let mut addr = BOTTOM;
        while addr < top {
            let expected = *starts.iter().rev().find(|&&s| s <= addr).unwrap();
            assert_eq!(part.block_start_const(&space, addr), Some(expected));
            assert_eq!(part.block_start(&space, addr), Some(expected));
            addr += HEAP_WORD_SIZE;
        }
    }

    #[test]
    fn large_block_is_back_chained_with_logarithmic_hops() {
        let cards = 1200;
        let (mut space, part) = setup(cards);
        let head = alloc(&mut space, &part, 10);
        let big_words = 1000 * CARD_WORDS + 5;
        let big = alloc(&mut space, &part, big_words);
        let tail = alloc(&mut space, &part, 4);

        // Card 1 holds the direct offset, later ones back-skip.
        assert_eq!(part.table().entry(1), Ok(Entry::Direct(54)));
        assert_eq!(part.table().entry(2), Ok(Entry::SkipBack(0)));
        assert_eq!(part.table().entry(16), Ok(Entry::SkipBack(0)));
        assert_eq!(part.table().entry(17), Ok(Entry::SkipBack(1)));
        assert_eq!(part.table().entry(257), Ok(Entry::SkipBack(2)));

        let mut max_hops = 0;
        let mut addr = big;
        while addr < big + big_words * HEAP_WORD_SIZE {
            assert_eq!(part.block_start(&space, addr), Some(big), "{addr:#x}");
            let (_, hops) = part.walk_back(addr, Some(part.max_valid_index()));
            max_hops = max_hops.max(hops);
            addr += CARD_SIZE / 2;
        }
        // 1000 cards need three powers of BASE.
        assert!(max_hops <= 3 * (BASE - 1), "took {max_hops} hops");
        assert!(max_hops >= 2);

        assert_eq!(part.block_start(&space, head + 8), Some(head));
        assert_eq!(part.block_start(&space, tail + 8), Some(tail));
    }

    #[test]
    fn forward_scan_steps_over_stale_entry() {
        let (mut space, part) = setup(8);
        let b1 = alloc(&mut space, &part, 48);
        let b2 = alloc(&mut space, &part, 96);
        // Card 1 starts inside b2; pretend it still points at b1.
        let card1 = BOTTOM + CARD_SIZE;
        assert_eq!(part.table().entry(1), Ok(Entry::Direct(16)));
        part.set_offset(1, Entry::SkipBack(0).encode()).unwrap();
        assert_eq!(part.block_at_or_preceding(card1, None), b1);

        for addr in (b2..b2 + 96 * HEAP_WORD_SIZE).step_by(HEAP_WORD_SIZE) {
            assert_eq!(part.block_start_const(&space, addr), Some(b2));
        }
        assert_eq!(part.block_start(&space, card1 + 64), Some(b2));
    }

    #[test]
    fn slow_walk_refines_crossed_cards() {
        let (mut space, part) = setup(8);
        // One recorded chunk that is later carved into small blocks.
        let chunk = space.bottom();
        part.alloc_block_words(chunk, 4 * CARD_WORDS).unwrap();
        let mut starts = Vec::new();
        for _ in 0..(4 * CARD_WORDS / 8) {
            starts.push(space.push(8));
        }
        assert_eq!(part.table().entry(2), Ok(Entry::SkipBack(0)));

        let target = BOTTOM + 3 * CARD_SIZE + 40;
        let expected = *starts.iter().rev().find(|&&s| s <= target).unwrap();
        assert_eq!(part.block_start(&space, target), Some(expected));

        // Cards 1 and 2 start exactly at block starts now.
        assert_eq!(part.table().entry(1), Ok(Entry::Direct(0)));
        assert_eq!(part.table().entry(2), Ok(Entry::Direct(0)));
        assert_eq!(part.table().entry(3), Ok(Entry::Direct(0)));
    }

    #[test]
    fn uninitialized_block_short_circuits_mutable_lookup() {
        let (mut space, part) = setup(8);
        let b1 = alloc(&mut space, &part, 20);
        let pending = space.push_uninitialized(200);
        part.alloc_block_words(pending, 200).unwrap();

        let inside = pending + 150 * HEAP_WORD_SIZE;
        assert_eq!(part.block_start(&space, inside), Some(pending));
        // b1 is formatted, the walk from it stops at the pending header.
        assert_eq!(part.block_start(&space, pending + 8), Some(pending));
        assert_eq!(part.block_start(&space, b1 + 8), Some(b1));
    }

    #[test]
    fn addresses_outside_region_are_not_found() {
        let (mut space, part) = setup(4);
        alloc(&mut space, &part, 10);
        assert_eq!(part.block_start(&space, BOTTOM - 8), None);
        assert_eq!(part.block_start(&space, BOTTOM + 4 * CARD_SIZE), None);
        assert_eq!(part.block_start_const(&space, BOTTOM + 4 * CARD_SIZE), None);
    }

    #[test]
    fn addresses_past_top_answer_top() {
        let (mut space, part) = setup(4);
        alloc(&mut space, &part, 10);
        let top = space.top();
        assert_eq!(part.block_start(&space, top), Some(top));
        assert_eq!(part.block_start_const(&space, top + 3 * CARD_SIZE), Some(top));
    }

    #[test]
    fn set_offset_for_block_is_idempotent() {
        let (mut space, part) = setup(64);
        space.push(10);
        let big = space.push(20 * CARD_WORDS);

        part.set_offset_for_block(&space, big).unwrap();
        let once: Vec<u8> =
            (0..64).map(|i| part.table().get(i).unwrap()).collect();
        let frontier = part.next_offset_index();

        part.set_offset_for_block(&space, big).unwrap();
        let twice: Vec<u8> =
            (0..64).map(|i| part.table().get(i).unwrap()).collect();

        assert_eq!(once, twice);
        assert_eq!(frontier, part.next_offset_index());
        assert_eq!(frontier, 21);
        assert_eq!(part.block_start_const(&space, big + 19 * CARD_SIZE), Some(big));
    }

    #[test]
    fn set_offset_for_block_rejects_foreign_addresses() {
        let (space, part) = setup(4);
        assert!(
            part.set_offset_for_block(&space, BOTTOM + 4 * CARD_SIZE)
                .unwrap_err()
                .is_range_error()
        );
    }

    #[test]
    fn region_checked_setters() {
        let table = Arc::new(OffsetTable::new(BOTTOM, 16 * CARD_SIZE).unwrap());
        let part = OffsetTablePart::new(
            table,
            BOTTOM + 4 * CARD_SIZE,
            BOTTOM + 8 * CARD_SIZE,
        )
        .unwrap();

        part.set_offset_range(5, 7, 64).unwrap();
        assert_eq!(part.table().get(6), Ok(64));
        assert_eq!(
            part.set_offset_range(6, 5, 0),
            Err(OffsetTableError::IndexOrder { left: 6, right: 5 })
        );
        assert_eq!(
            part.set_offset_range(5, 8, 0),
            Err(OffsetTableError::IndexOutOfRange {
                index: 8,
                first: 4,
                last: 7
            })
        );
        assert!(part.set_offset(3, 0).is_err());
        assert!(part.set_offset(7, 90).unwrap_err().is_encoding_error());
    }

    #[test]
    fn alloc_block_rejects_gaps_and_reversed_blocks() {
        let (_space, part) = setup(8);
        assert!(matches!(
            part.alloc_block(BOTTOM + 64, BOTTOM),
            Err(OffsetTableError::AddressOrder { .. })
        ));
        // Starts after the threshold card boundary.
        assert!(matches!(
            part.alloc_block(BOTTOM + 2 * CARD_SIZE, BOTTOM + 3 * CARD_SIZE + 8),
            Err(OffsetTableError::AddressOrder { .. })
        ));
    }

    #[test]
    fn humongous_block_spans_into_next_region() {
        let table = Arc::new(OffsetTable::new(BOTTOM, 16 * CARD_SIZE).unwrap());
        let first =
            OffsetTablePart::new(table.clone(), BOTTOM, BOTTOM + 8 * CARD_SIZE)
                .unwrap();
        let second = OffsetTablePart::new(
            table,
            BOTTOM + 8 * CARD_SIZE,
            BOTTOM + 16 * CARD_SIZE,
        )
        .unwrap();

        let mut space = FakeSpace::new(BOTTOM, BOTTOM + 16 * CARD_SIZE);
        let words = 11 * CARD_WORDS + 3;
        let obj = space.push(words);
        let obj_top = obj + words * HEAP_WORD_SIZE;
        let fill = (BOTTOM + 16 * CARD_SIZE - obj_top) / HEAP_WORD_SIZE;
        let filler = space.push(fill);
        first.set_for_starts_humongous(obj_top, fill).unwrap();
        second.set_object_can_span(true);

        let tail = space.window(second.bottom(), second.end());
        let inside = BOTTOM + 10 * CARD_SIZE + 16;
        assert_eq!(second.block_start_const(&tail, inside), Some(obj));
        assert_eq!(second.block_start(&tail, inside), Some(obj));
        assert_eq!(second.block_start(&tail, filler + 8), Some(filler));
    }

    #[test]
    fn concurrent_range_updates_never_disturb_lookups() {
        let (mut space, part) = setup(256);
        let b1 = alloc(&mut space, &part, 48);
        let b2 = alloc(&mut space, &part, 3 * CARD_WORDS);
        for _ in 0..100 {
            alloc(&mut space, &part, 2 * CARD_WORDS + 1);
        }
        let target = b2 + 2 * CARD_SIZE;
        let card = part.table().index_for(target).unwrap();
        // Stale: target's card points back at b1.
        let card_start = part.table().address_for_index(card).unwrap();
        part.set_offset_range(card, card, 64).unwrap();
        part.set_offset_range(card - 1, card - 1, 64).unwrap();
        part.set_offset_between(card - 2, card_start - 2 * CARD_SIZE, b1)
            .unwrap();

        thread::scope(|scope| {
            let reader = scope.spawn(|| {
                for _ in 0..20_000 {
                    assert_eq!(part.block_start_const(&space, target), Some(b2));
                }
            });
            scope.spawn(|| {
                for round in 0..2_000 {
                    let left = 100 + round % 50;
                    part.set_offset_range(left, left + 20, 64).unwrap();
                }
                part.set_offset_for_block(&space, b2).unwrap();
            });
            reader.join().unwrap();
        });

        assert_eq!(part.block_start(&space, target), Some(b2));
        assert_eq!(
            part.block_at_or_preceding(target, Some(part.max_valid_index())),
            b2
        );
    }
}
