//! Shared ambient code for the access cache crates.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
