pub mod detector;
pub mod isolation_forest;

pub use detector::*;
pub use isolation_forest::IsolationForest;
