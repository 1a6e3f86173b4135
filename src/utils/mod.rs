//! Export contents of `utils` folder
mod utils;

pub use self::utils::*;
