//! Library modules for the vigil governance agent.
//!
//! The binary in `main.rs` wires these together; keeping them in the
//! library crate lets unit tests exercise every layer without a network.

pub mod agent;
pub mod chain;
pub mod config;
pub mod copytrade;
pub mod decision;
pub mod poller;
pub mod proposals;
pub mod relayer;
pub mod venue;
