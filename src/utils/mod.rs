pub mod constants;
pub mod logging;

pub use constants::*;
