//! Infrastructure layer
//!
//! Handles all I/O operations: transports, subprocesses, mounts, network
//! configuration and the device registry.

pub mod devices;
pub mod fetch;
pub mod net;
pub mod pipe;
pub mod scratch;
pub mod system;
pub mod transport;
