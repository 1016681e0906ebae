pub mod features;
pub mod indicators;


pub use features::*;
pub use indicators::*;
