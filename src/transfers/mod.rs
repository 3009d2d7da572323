//! Transfer tracking: per-address output ledgers and the synchronizer that
//! feeds them from blocks and the transaction pool

pub mod consumer;
pub mod container;
pub mod synchronizer;
pub mod types;

pub use consumer::{AccountSubscription, TransfersConsumer, TransfersSubscription};
pub use container::{ContainerSnapshot, TransfersContainer};
pub use synchronizer::{SynchronizerSnapshot, TransfersSynchronizer};
pub use types::{
    DetachResult, IncludeFlags, OutputId, OutputKind, SpentOutput, SpentOutputDescriptor,
    SynchronizationStart, TransactionBlockInfo, TransactionInformation,
    TransactionOutputInformation, TransferState, TransfersEvent, UNCONFIRMED_GLOBAL_OUTPUT_INDEX,
    UNCONFIRMED_TRANSACTION_HEIGHT,
};
