pub mod config;
pub mod stats;

pub use config::*;
pub use stats::*;
