//! Core logic
//!
//! Descriptor handling and the resolution algorithms. Everything that
//! touches the system goes through the traits in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`scheme`] - Scheme table and static capabilities
//! - [`url`] - Descriptor parsing and printing
//! - [`sniff`] - Inline format detection of fetched data
//! - [`mount`] - Mount resolution engine
//! - [`locate`] - Repository and install-system locators

pub mod locate;
pub mod mount;
pub mod scheme;
pub mod sniff;
pub mod url;
