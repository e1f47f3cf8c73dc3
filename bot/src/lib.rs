mod constants;
mod error;
mod part;
mod space;
mod table;
mod verify;

#[cfg(test)]
mod testing;

pub use constants::*;
pub use error::{OffsetTableError, Result, VerifyError};
pub use part::OffsetTablePart;
pub use space::{BlockProbe, Space};
pub use table::OffsetTable;
