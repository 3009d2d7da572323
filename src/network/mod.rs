//! Node access for the wallet
//!
//! The wallet only needs a block/pool source, a relay and a decoy lookup.
//! I keep the interface as a trait so the CLI can run offline and the tests
//! can run against an in-process chain.

pub mod memory;
pub mod node;

pub use memory::InMemoryNode;
pub use node::{NewBlocks, Node, OfflineNode, PoolChanges, RandomOutput, RandomOutputs};
