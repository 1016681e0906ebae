pub mod error;
pub mod io;
pub mod layout;
pub mod store;

pub use error::StoreError;
pub use layout::DataLayout;
pub use store::*;
