use std::{
    ops::Range,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::{
    CARD_SIZE, CARD_WORDS, Entry, LOG_CARD_SIZE, OffsetTableError, Result,
    constants::{is_card_aligned, pointer_delta},
};

/// One entry byte per card of a reserved address range.
///
/// The table never dereferences heap memory; it only does arithmetic on
/// addresses. Entries are atomics so lookups may run while other threads
/// update the table: a reader sees either the old or the new byte.
#[derive(Debug)]
pub struct OffsetTable {
    start: usize,
    end: usize,
    entries: Box<[AtomicU8]>,
}

impl OffsetTable {
    /// Number of entries needed to cover `bytes` of heap.
    pub const fn compute_size(bytes: usize) -> usize {
        bytes.div_ceil(CARD_SIZE)
    }

    /// Creates a zeroed table covering `[start, start + size)`.
    pub fn new(start: usize, size: usize) -> Result<Self> {
        if !is_card_aligned(start) {
            return Err(OffsetTableError::Misaligned {
                what: "reserved start",
                value: start,
            });
        }
        if !is_card_aligned(size) {
            return Err(OffsetTableError::Misaligned {
                what: "reserved size",
                value: size,
            });
        }
        let end = start.checked_add(size).ok_or(
            OffsetTableError::AddressOutOfRange {
                addr: start,
                start,
                end: usize::MAX,
            },
        )?;
        if size == 0 {
            return Err(OffsetTableError::EmptyRange { start, end });
        }

        let mut entries = Vec::new();
        entries.resize_with(Self::compute_size(size), || AtomicU8::new(0));

        Ok(Self {
            start,
            end,
            entries: entries.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn reserved(&self) -> Range<usize> {
        self.start..self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    #[inline]
    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(OffsetTableError::IndexOutOfRange {
                index,
                first: 0,
                last: self.entries.len() - 1,
            })
        }
    }

    #[inline]
    fn check_address(&self, addr: usize) -> Result<()> {
        if self.contains(addr) {
            Ok(())
        } else {
            Err(OffsetTableError::AddressOutOfRange {
                addr,
                start: self.start,
                end: self.end,
            })
        }
    }

    // ── index <-> address ─────────────────────────────────────────────

    /// Card index of `addr` without range checks.
    #[inline(always)]
    pub fn index_for_raw(&self, addr: usize) -> usize {
        debug_assert!(addr >= self.start, "{addr:#x} below reserved start");
        (addr - self.start) >> LOG_CARD_SIZE
    }

    pub fn index_for(&self, addr: usize) -> Result<usize> {
        self.check_address(addr)?;
        Ok(self.index_for_raw(addr))
    }

    /// Start address of card `index` without range checks.
    #[inline(always)]
    pub fn address_for_index_raw(&self, index: usize) -> usize {
        self.start + (index << LOG_CARD_SIZE)
    }

    pub fn address_for_index(&self, index: usize) -> Result<usize> {
        self.check_index(index)?;
        Ok(self.address_for_index_raw(index))
    }

    #[inline(always)]
    pub fn is_card_boundary(&self, addr: usize) -> bool {
        is_card_aligned(addr)
    }

    // ── entries ───────────────────────────────────────────────────────

    /// Raw entry without the range check. Panics on an index past the end.
    #[inline(always)]
    pub fn get_raw(&self, index: usize) -> u8 {
        self.entries[index].load(Ordering::Relaxed)
    }

    pub fn get(&self, index: usize) -> Result<u8> {
        self.check_index(index)?;
        Ok(self.get_raw(index))
    }

    pub fn entry(&self, index: usize) -> Result<Entry> {
        let value = self.get(index)?;
        Entry::decode(value).ok_or(OffsetTableError::InvalidEntry { value })
    }

    #[inline(always)]
    pub(crate) fn set_raw(&self, index: usize, value: u8) {
        debug_assert!(Entry::is_valid(value));
        self.entries[index].store(value, Ordering::Relaxed);
    }

    pub fn set(&self, index: usize, value: u8) -> Result<()> {
        self.check_index(index)?;
        if !Entry::is_valid(value) {
            return Err(OffsetTableError::InvalidEntry { value });
        }
        self.set_raw(index, value);
        Ok(())
    }

    /// Stores the word distance `high - low` as a direct entry.
    pub fn set_offset(&self, index: usize, high: usize, low: usize) -> Result<()> {
        self.check_index(index)?;
        if high < low {
            return Err(OffsetTableError::AddressOrder { high, low });
        }
        let words = pointer_delta(high, low);
        let entry = Entry::direct(words).ok_or(
            OffsetTableError::OffsetTooLarge {
                words,
                limit: CARD_WORDS,
            },
        )?;
        self.set_raw(index, entry.encode());
        Ok(())
    }

    /// Fills `[left, right]` with `value`.
    ///
    /// Each byte is a single relaxed store, so concurrent readers of the
    /// range never need a lock.
    pub fn set_range(&self, left: usize, right: usize, value: u8) -> Result<()> {
        self.check_index(right)?;
        if left > right {
            return Err(OffsetTableError::IndexOrder { left, right });
        }
        if !Entry::is_valid(value) {
            return Err(OffsetTableError::InvalidEntry { value });
        }
        for entry in &self.entries[left..=right] {
            entry.store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Zeroes the entries of a recommitted, card-aligned range.
    pub fn clear(&self, range: Range<usize>) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        if !is_card_aligned(range.start) || !is_card_aligned(range.end) {
            return Err(OffsetTableError::Misaligned {
                what: "cleared range",
                value: if is_card_aligned(range.start) {
                    range.end
                } else {
                    range.start
                },
            });
        }
        let left = self.index_for(range.start)?;
        let right = self.index_for(range.end - 1)?;
        self.set_range(left, right, 0)
    }
}
