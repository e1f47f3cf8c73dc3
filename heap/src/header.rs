use bot::HEAP_WORD_SIZE;

/// Kind tag stored in byte 0 of a block header. Zero means the header has
/// not been published yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    ObjectArray = 1,
    PrimitiveArray,
    Filler,
}

impl BlockKind {
    #[inline(always)]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::ObjectArray),
            2 => Some(Self::PrimitiveArray),
            3 => Some(Self::Filler),
            _ => None,
        }
    }
}

/// Element type of a primitive array, byte 1 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    U8 = 1,
    U16,
    U32,
    U64,
}

impl ElementType {
    pub const ALL: [Self; 4] = [Self::U8, Self::U16, Self::U32, Self::U64];

    #[inline(always)]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            3 => Some(Self::U32),
            4 => Some(Self::U64),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

/// The one-word header at the start of every heap block.
///
/// ```text
/// byte 0:    kind (0 = not yet published)
/// byte 1:    element type, primitive arrays only
/// bytes 2‥3: reserved (zero)
/// bytes 4‥7: length: elements for arrays, total words for fillers
/// ```
///
/// Headers are written with a single release store once the block's
/// payload is in place, so a reader that sees a non-zero kind can trust
/// the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BlockHeader(u64);

impl BlockHeader {
    pub const UNINITIALIZED: Self = Self(0);

    const fn pack(kind: BlockKind, element: u8, length: u32) -> Self {
        Self(kind as u64 | (element as u64) << 8 | (length as u64) << 32)
    }

    /// Array of `length` heap references.
    pub const fn object_array(length: u32) -> Self {
        Self::pack(BlockKind::ObjectArray, 0, length)
    }

    pub const fn primitive_array(element: ElementType, length: u32) -> Self {
        Self::pack(BlockKind::PrimitiveArray, element as u8, length)
    }

    /// Dead space of `words` heap words, header included.
    pub const fn filler(words: u32) -> Self {
        assert!(words > 0);
        Self::pack(BlockKind::Filler, 0, words)
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn kind(self) -> Option<BlockKind> {
        BlockKind::from_raw(self.0 as u8)
    }

    #[inline(always)]
    pub const fn element_type(self) -> Option<ElementType> {
        ElementType::from_raw((self.0 >> 8) as u8)
    }

    #[inline(always)]
    pub const fn length(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline(always)]
    pub const fn is_initialized(self) -> bool {
        self.kind().is_some()
    }

    /// Block size in heap words, header included.
    ///
    /// Unpublished or unknown headers read as one-word blocks so a walk over
    /// them never leaves the mapping.
    pub const fn size_in_words(self) -> usize {
        let length = self.length() as usize;
        match self.kind() {
            Some(BlockKind::ObjectArray) => 1 + length,
            Some(BlockKind::PrimitiveArray) => match self.element_type() {
                Some(element) => {
                    1 + (length * element.size()).div_ceil(HEAP_WORD_SIZE)
                }
                None => 1,
            },
            Some(BlockKind::Filler) => length,
            None => 1,
        }
    }
}
