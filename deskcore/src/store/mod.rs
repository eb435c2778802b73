pub mod error;
pub mod traits;

pub use error::{Result, StoreError};
pub use traits::*;
