mod types;

pub use types::{AmsError, Result};
