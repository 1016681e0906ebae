pub mod ratios;
pub mod raw_table;

pub use ratios::*;
pub use raw_table::RawTable;
