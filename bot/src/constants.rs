//! Card geometry and the one-byte entry encoding.
//!
//! ```text
//! raw value                        meaning
//! 0 ..  CARD_WORDS                 Direct(words): block starts `words` heap
//!                                  words before the card start
//! CARD_WORDS .. +N_POWERS          SkipBack(power): step back BASE^power
//!                                  cards and read again
//! CARD_WORDS + N_POWERS ..= 255    never written
//! ```

pub const LOG_HEAP_WORD_SIZE: u32 = 3;
/// Size of a heap word in bytes. Offsets are counted in words.
pub const HEAP_WORD_SIZE: usize = 1 << LOG_HEAP_WORD_SIZE;

pub const LOG_CARD_SIZE: u32 = 9;
/// Size of a card in bytes (512).
pub const CARD_SIZE: usize = 1 << LOG_CARD_SIZE;

pub const LOG_CARD_WORDS: u32 = LOG_CARD_SIZE - LOG_HEAP_WORD_SIZE;
/// Heap words per card (64). Also the first raw value of a back-skip entry.
pub const CARD_WORDS: usize = 1 << LOG_CARD_WORDS;

pub const LOG_BASE: u32 = 4;
/// Base of the exponential back-chain (16).
pub const BASE: usize = 1 << LOG_BASE;
/// Number of distinct back-skip powers, `BASE^0 ..= BASE^(N_POWERS - 1)`.
pub const N_POWERS: usize = 14;

const _: () = assert!(CARD_WORDS + N_POWERS <= u8::MAX as usize + 1);
const _: () = assert!(LOG_BASE as usize * N_POWERS < usize::BITS as usize);

/// Number of cards a back-skip of `power` steps over.
#[inline(always)]
pub const fn power_to_cards_back(power: usize) -> usize {
    1 << (LOG_BASE as usize * power)
}

/// Number of cards the raw entry `entry` steps back, zero for direct offsets.
#[inline(always)]
pub const fn entry_to_cards_back(entry: u8) -> usize {
    match Entry::decode(entry) {
        Some(entry) => entry.cards_back(),
        None => 0,
    }
}

/// Word distance between two addresses, `high >= low`.
#[inline(always)]
pub const fn pointer_delta(high: usize, low: usize) -> usize {
    (high - low) >> LOG_HEAP_WORD_SIZE
}

#[inline(always)]
pub const fn is_card_aligned(addr: usize) -> bool {
    addr & (CARD_SIZE - 1) == 0
}

#[inline(always)]
pub const fn align_down_to_card(addr: usize) -> usize {
    addr & !(CARD_SIZE - 1)
}

#[inline(always)]
pub const fn align_up_to_card(addr: usize) -> usize {
    align_down_to_card(addr + CARD_SIZE - 1)
}

/// Decoded form of a table byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Block start lies this many heap words before the card start.
    Direct(u8),
    /// Step back `BASE^power` cards.
    SkipBack(u8),
}

impl Entry {
    /// Direct entry for a word distance, if it fits.
    #[inline(always)]
    pub const fn direct(words: usize) -> Option<Self> {
        if words < CARD_WORDS {
            Some(Self::Direct(words as u8))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn skip_back(power: usize) -> Option<Self> {
        if power < N_POWERS {
            Some(Self::SkipBack(power as u8))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn decode(raw: u8) -> Option<Self> {
        let raw_usize = raw as usize;
        if raw_usize < CARD_WORDS {
            Some(Self::Direct(raw))
        } else if raw_usize < CARD_WORDS + N_POWERS {
            Some(Self::SkipBack(raw - CARD_WORDS as u8))
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn encode(self) -> u8 {
        match self {
            Self::Direct(words) => words,
            Self::SkipBack(power) => CARD_WORDS as u8 + power,
        }
    }

    #[inline(always)]
    pub const fn is_valid(raw: u8) -> bool {
        Self::decode(raw).is_some()
    }

    /// Cards to step back, zero for a direct entry.
    #[inline(always)]
    pub const fn cards_back(self) -> usize {
        match self {
            Self::Direct(_) => 0,
            Self::SkipBack(power) => power_to_cards_back(power as usize),
        }
    }
}
