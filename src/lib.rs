//! insturl - installation source resolver
//!
//! Turns installation source addresses (`nfs://server/repo`,
//! `hd:/dev/sda1/install`, `http://server/image`) into read-only mounted
//! filesystems.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Descriptors, mount resolution and the locators
//! - [`infra`] - Infrastructure layer (transports, processes, mounts, network)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
