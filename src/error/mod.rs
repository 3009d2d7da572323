//! Error handling for the wallet core
//!
//! Every public wallet operation returns either a value or one of the
//! error kinds below. Validation kinds are raised before any mutation or
//! network call; `Internal` always signals a broken invariant.

use std::fmt;

/// Result type alias for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Error kinds surfaced by the wallet core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Address string failed to parse or does not belong to this currency
    BadAddress(String),
    /// A destination requested a zero amount
    ZeroDestination,
    /// Summing destinations and fee overflowed
    SumOverflow,
    /// Not enough spendable money to cover the request
    InsufficientFunds { required: u64, available: u64 },
    /// The node returned fewer decoys than the requested mixin
    MixinTooLarge { amount: u64, requested: u64, available: u64 },
    /// Serialized transaction exceeds the applicable size limit
    TransactionTooLarge { size: usize, limit: usize },
    /// Fusion threshold is not above the dust threshold
    ThresholdTooLow { threshold: u64, dust_threshold: u64 },
    /// No bucket holds enough outputs to build a fusion transaction
    NothingToOptimize,
    /// Fusion transaction could not keep the minimum number of inputs
    MinimumInputCount { required: usize, actual: usize },
    /// Deposit term or amount outside the allowed range
    DepositParameters(String),
    /// Deposit has not matured or its output is not spendable yet
    DepositLocked(usize),
    /// Deposit index does not exist
    DepositNotFound(usize),
    /// Attempted to spend from a view-only wallet
    TrackingMode,
    /// Operation is not valid in the current lifecycle state
    WrongState(String),
    /// Password does not decrypt the wallet container
    WrongPassword,
    /// Wallet file version cannot be read by this build
    WrongVersion(u32),
    /// Lookup of an address, transaction or transfer missed
    ObjectNotFound(String),
    /// Index passed to a query is out of range
    IndexOutOfRange { index: usize, len: usize },
    /// Address is already tracked by the wallet
    AddressAlreadyExists(String),
    /// Several source addresses were used without a change address
    ChangeAddressRequired,
    /// Requested transaction cannot be committed
    TransferImpossible(usize),
    /// Requested transaction cannot be rolled back
    CancelImpossible(usize),
    /// Wallet was stopped while the operation was pending
    OperationCancelled,
    /// Node request failed
    Network(String),
    /// Key or signature primitive failed
    Crypto(String),
    /// Configuration could not be read or applied
    Config(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Encryption/decryption errors
    Encryption(String),
    /// File I/O errors
    Io(String),
    /// Consistency failure inside the wallet
    Internal(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::BadAddress(addr) => write!(f, "Bad address: {addr}"),
            WalletError::ZeroDestination => write!(f, "Destination amount must be positive"),
            WalletError::SumOverflow => write!(f, "Sum of amounts overflowed"),
            WalletError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            WalletError::MixinTooLarge {
                amount,
                requested,
                available,
            } => write!(
                f,
                "Mixin count is too big: {requested} requested, {available} decoys for amount {amount}"
            ),
            WalletError::TransactionTooLarge { size, limit } => {
                write!(f, "Transaction size {size} exceeds limit {limit}")
            }
            WalletError::ThresholdTooLow {
                threshold,
                dust_threshold,
            } => write!(
                f,
                "Threshold {threshold} must be greater than dust threshold {dust_threshold}"
            ),
            WalletError::NothingToOptimize => write!(f, "There is nothing to optimize"),
            WalletError::MinimumInputCount { required, actual } => write!(
                f,
                "Fusion transaction needs at least {required} inputs, got {actual}"
            ),
            WalletError::DepositParameters(msg) => write!(f, "Invalid deposit: {msg}"),
            WalletError::DepositLocked(id) => write!(f, "Deposit {id} is locked"),
            WalletError::DepositNotFound(id) => write!(f, "Deposit {id} does not exist"),
            WalletError::TrackingMode => {
                write!(f, "Operation is not allowed in tracking wallet")
            }
            WalletError::WrongState(msg) => write!(f, "Wrong wallet state: {msg}"),
            WalletError::WrongPassword => write!(f, "The password is wrong"),
            WalletError::WrongVersion(version) => {
                write!(f, "Unsupported wallet file version {version}")
            }
            WalletError::ObjectNotFound(what) => write!(f, "Object not found: {what}"),
            WalletError::IndexOutOfRange { index, len } => {
                write!(f, "Index {index} is out of range (size {len})")
            }
            WalletError::AddressAlreadyExists(addr) => {
                write!(f, "Address already exists: {addr}")
            }
            WalletError::ChangeAddressRequired => write!(f, "Change address is required"),
            WalletError::TransferImpossible(id) => {
                write!(f, "Transaction {id} cannot be committed")
            }
            WalletError::CancelImpossible(id) => {
                write!(f, "Transaction {id} cannot be cancelled")
            }
            WalletError::OperationCancelled => write!(f, "Operation cancelled"),
            WalletError::Network(msg) => write!(f, "Network error: {msg}"),
            WalletError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            WalletError::Config(msg) => write!(f, "Configuration error: {msg}"),
            WalletError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            WalletError::Encryption(msg) => write!(f, "Encryption error: {msg}"),
            WalletError::Io(msg) => write!(f, "I/O error: {msg}"),
            WalletError::Internal(msg) => write!(f, "Internal wallet error: {msg}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::Io(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for WalletError {
    fn from(err: bincode::error::EncodeError) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for WalletError {
    fn from(err: bincode::error::DecodeError) -> Self {
        WalletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for WalletError {
    fn from(err: toml::de::Error) -> Self {
        WalletError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = WalletError::InsufficientFunds {
            required: 10,
            available: 3,
        };
        assert_eq!(err.to_string(), "Insufficient funds: required 10, available 3");
        assert_eq!(
            WalletError::ObjectNotFound("tx".to_string()).to_string(),
            "Object not found: tx"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WalletError = io.into();
        assert!(matches!(err, WalletError::Io(_)));
    }
}
