use log::debug;

use crate::{
    CARD_SIZE, Entry, HEAP_WORD_SIZE, OffsetTablePart, Space, VerifyError, align_down_to_card,
    part::block_end,
};

impl OffsetTablePart {
    /// Checks every card between the region bottom and `top`.
    ///
    /// A direct entry must name a block from which the card start can be
    /// reached by walking block sizes without passing `top`. A back-skip must
    /// stay inside the region unless the region continues a humongous block.
    /// Back-skips say nothing else: refinement rewrites them lazily.
    pub fn verify<S: Space>(&self, space: &S) -> Result<(), VerifyError> {
        let bottom = self.bottom();
        let top = space.top();
        let start_card = self.bottom_index();
        let can_span = self.object_can_span();
        let table = self.table();

        if !can_span {
            let value = table.get(start_card)?;
            if value != 0 {
                return Err(VerifyError::BottomNotZero {
                    card: start_card,
                    value,
                });
            }
        }
        if top <= bottom {
            return Ok(());
        }

        let end_card = table.index_for(top - 1)?;
        for card in start_card..=end_card {
            match table.entry(card)? {
                Entry::Direct(words) => {
                    let words = words as usize;
                    let card_address = table.address_for_index_raw(card);
                    let mut obj_end = card_address - words * HEAP_WORD_SIZE;
                    while obj_end < card_address {
                        let obj = obj_end;
                        let size = space.block_size(obj);
                        obj_end = obj + size * HEAP_WORD_SIZE;
                        if obj_end <= obj || obj_end > top {
                            return Err(VerifyError::InvalidBlockEnd {
                                card,
                                block: obj,
                                words: size,
                                block_end: obj_end,
                                top,
                            });
                        }
                    }
                }
                skip @ Entry::SkipBack(_) => {
                    let cards_back = skip.cards_back();
                    if !can_span && cards_back > card - start_card {
                        return Err(VerifyError::BackSkipPastStart {
                            card,
                            cards_back,
                            start_card,
                        });
                    }
                }
            }
        }
        debug!(
            "verified cards {start_card}..={end_card} of region [{bottom:#x}, {:#x})",
            self.end()
        );
        Ok(())
    }

    /// Walks the blocks from the region bottom to `top` and checks that the
    /// read-only lookup answers each block's first word, last word and every
    /// card boundary inside it.
    ///
    /// A region continuing a humongous block starts its walk at the block
    /// covering `bottom`, which lies in an earlier region.
    pub fn verify_block_starts<S: Space>(&self, space: &S) -> Result<(), VerifyError> {
        let bottom = self.bottom();
        let top = space.top();
        let check = |addr: usize, expected: usize| {
            let found = self.block_start_const(space, addr);
            if found == Some(expected) {
                Ok(())
            } else {
                Err(VerifyError::WrongBlockStart {
                    addr,
                    found,
                    expected,
                })
            }
        };

        let mut block = bottom;
        if self.object_can_span() && top > bottom {
            block = self.block_start_const(space, bottom).unwrap_or(bottom);
        }
        while block < top {
            let end = block_end(space, block);
            let first = block.max(bottom);
            check(first, block)?;
            check(end.min(top) - HEAP_WORD_SIZE, block)?;
            let mut boundary = align_down_to_card(first) + CARD_SIZE;
            while boundary < end.min(top) {
                check(boundary, block)?;
                boundary += CARD_SIZE;
            }
            block = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{CARD_WORDS, OffsetTable, testing::FakeSpace};

    const BOTTOM: usize = 0x3000_0000;

    fn filled(cards: usize, sizes: &[usize]) -> (FakeSpace, OffsetTablePart) {
        let end = BOTTOM + cards * CARD_SIZE;
        let table = Arc::new(OffsetTable::new(BOTTOM, cards * CARD_SIZE).unwrap());
        let part = OffsetTablePart::new(table, BOTTOM, end).unwrap();
        let mut space = FakeSpace::new(BOTTOM, end);
        for &words in sizes {
            let start = space.push(words);
            part.alloc_block_words(start, words).unwrap();
        }
        (space, part)
    }

    #[test]
    fn well_formed_region_verifies() {
        let (space, part) =
            filled(64, &[10, 3, 40 * CARD_WORDS, 7, 2 * CARD_WORDS + 1, 64]);
        part.verify(&space).unwrap();
        part.verify_block_starts(&space).unwrap();
    }

    #[test]
    fn empty_region_verifies() {
        let (space, part) = filled(8, &[]);
        part.verify(&space).unwrap();
        part.verify_block_starts(&space).unwrap();
    }

    #[test]
    fn nonzero_bottom_entry_is_reported() {
        let (space, part) = filled(8, &[100]);
        part.table().set(0, 5).unwrap();
        assert_eq!(
            part.verify(&space),
            Err(VerifyError::BottomNotZero { card: 0, value: 5 })
        );

        part.set_object_can_span(true);
        assert!(!matches!(
            part.verify(&space),
            Err(VerifyError::BottomNotZero { .. })
        ));
    }

    #[test]
    fn back_skip_out_of_region_is_reported() {
        let (space, part) = filled(32, &[20 * CARD_WORDS]);
        part.table().set(3, Entry::SkipBack(1).encode()).unwrap();
        assert_eq!(
            part.verify(&space),
            Err(VerifyError::BackSkipPastStart {
                card: 3,
                cards_back: 16,
                start_card: 0
            })
        );
    }

    #[test]
    fn block_running_past_top_is_reported() {
        let (space, part) = filled(8, &[20, 3 * CARD_WORDS]);
        let short = space.window(BOTTOM, BOTTOM + 2 * CARD_SIZE);
        assert!(matches!(
            part.verify(&short),
            Err(VerifyError::InvalidBlockEnd { card: 1, .. })
        ));
    }

    #[test]
    fn continuing_region_walks_from_spanning_block() {
        let end = BOTTOM + 16 * CARD_SIZE;
        let middle = BOTTOM + 8 * CARD_SIZE;
        let table = Arc::new(OffsetTable::new(BOTTOM, 16 * CARD_SIZE).unwrap());
        let first = OffsetTablePart::new(table.clone(), BOTTOM, middle).unwrap();
        let second = OffsetTablePart::new(table, middle, end).unwrap();

        let mut space = FakeSpace::new(BOTTOM, end);
        let big = space.push(12 * CARD_WORDS);
        let filler = space.push(4 * CARD_WORDS);
        first.set_for_starts_humongous(filler, 4 * CARD_WORDS).unwrap();
        second.set_object_can_span(true);

        let head = space.window(BOTTOM, middle);
        let tail = space.window(middle, end);
        first.verify(&head).unwrap();
        first.verify_block_starts(&head).unwrap();
        second.verify(&tail).unwrap();
        second.verify_block_starts(&tail).unwrap();
        assert_eq!(second.block_start_const(&tail, middle), Some(big));
    }

    #[test]
    fn wrong_direct_offset_breaks_block_starts() {
        let (space, part) = filled(8, &[CARD_WORDS, CARD_WORDS, 2 * CARD_WORDS]);
        part.verify_block_starts(&space).unwrap();

        // Card 3 starts inside the third block; a zero offset names the
        // card start itself.
        part.set_offset(3, 0).unwrap();
        let third = BOTTOM + 2 * CARD_SIZE;
        assert!(matches!(
            part.verify_block_starts(&space),
            Err(VerifyError::WrongBlockStart { expected, .. }) if expected == third
        ));
    }
}
