//! Configuration management
//!
//! Data directory, wallet file and mining deadline used by the command-line tool.

pub mod settings;

pub use settings::{Config, GLOBAL_CONFIG};
