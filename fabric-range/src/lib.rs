pub mod range;
pub use range::{Range, Split};

pub mod error;
pub use error::Error;
