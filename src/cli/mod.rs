//! Command-line interface
//!
//! Argument parsing for the `conceal-wallet` binary. Wallet commands open
//! the file offline: they read and edit the cached state but never talk to
//! a node.

pub mod commands;

pub use commands::{Command, Opt};
