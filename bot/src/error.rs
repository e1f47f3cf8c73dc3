use thiserror::Error;

/// Contract violations reported by the table and its region views.
///
/// Every variant is a caller bug: either a range error (an address or index
/// outside the covered span, indexes out of order, misaligned bounds) or an
/// encoding error (a value that cannot be stored as an entry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffsetTableError {
    #[error("address {addr:#x} not in reserved [{start:#x}, {end:#x})")]
    AddressOutOfRange {
        addr: usize,
        start: usize,
        end: usize,
    },

    #[error("card index {index} out of range [{first}, {last}]")]
    IndexOutOfRange {
        index: usize,
        first: usize,
        last: usize,
    },

    #[error("card indexes out of order: left {left} > right {right}")]
    IndexOrder { left: usize, right: usize },

    #[error("addresses out of order: high {high:#x} < low {low:#x}")]
    AddressOrder { high: usize, low: usize },

    #[error("{what} {value:#x} is not card aligned")]
    Misaligned { what: &'static str, value: usize },

    #[error("empty range [{start:#x}, {end:#x})")]
    EmptyRange { start: usize, end: usize },

    #[error("offset of {words} words does not fit a direct entry (limit {limit})")]
    OffsetTooLarge { words: usize, limit: usize },

    #[error("value {value} is outside the entry encoding space")]
    InvalidEntry { value: u8 },
}

impl OffsetTableError {
    pub fn is_range_error(&self) -> bool {
        !self.is_encoding_error()
    }

    pub fn is_encoding_error(&self) -> bool {
        matches!(
            self,
            Self::OffsetTooLarge { .. } | Self::InvalidEntry { .. }
        )
    }
}

/// Inconsistencies found by [`crate::OffsetTablePart::verify`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error(
        "card {card}: block {block:#x} of {words} words ends at {block_end:#x}, top is {top:#x}"
    )]
    InvalidBlockEnd {
        card: usize,
        block: usize,
        words: usize,
        block_end: usize,
        top: usize,
    },

    #[error(
        "card {card}: back-skip of {cards_back} cards passes region start card {start_card}"
    )]
    BackSkipPastStart {
        card: usize,
        cards_back: usize,
        start_card: usize,
    },

    #[error("first card {card} of the region holds {value} instead of 0")]
    BottomNotZero { card: usize, value: u8 },

    #[error("block_start({addr:#x}) returned {found:?}, expected {expected:#x}")]
    WrongBlockStart {
        addr: usize,
        found: Option<usize>,
        expected: usize,
    },

    #[error(transparent)]
    Table(#[from] OffsetTableError),
}

pub type Result<T> = std::result::Result<T, OffsetTableError>;
