pub mod backtest;
pub mod ttest;

pub use backtest::*;
pub use ttest::*;
