mod error;
mod factory;
mod header;
mod heap;
mod region;
mod system;

pub use error::{HeapError, Result};
pub use header::{BlockHeader, BlockKind, ElementType};
pub use heap::*;
pub use region::{Blocks, HeapRegion, RegionKind, ReservedBlock};
pub use system::OS_PAGE_SIZE;
