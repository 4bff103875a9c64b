//! Configuration and constants
//!
//! - [`defaults`] - built-in constants
//! - [`settings`] - installer settings loaded from TOML

pub mod defaults;
pub mod settings;

pub use settings::Settings;
