//! Test fixtures
//!
//! Hand-made owned outputs for the builder and fusion tests, and a wallet
//! funded on an in-memory chain for the send tests.

pub mod test_utils;

pub use test_utils::*;
