use thiserror::Error;

use types::AssetId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxPoolError {
    #[error("already known transaction")]
    AlreadyKnown,
    #[error("oversized data")]
    OversizedData,
    #[error("negative value")]
    NegativeValue,
    #[error("exceeds block gas limit")]
    GasLimit,
    #[error("invalid sender")]
    InvalidSender,
    #[error("transaction underpriced")]
    Underpriced,
    #[error("replacement transaction underpriced")]
    ReplaceUnderpriced,
    #[error("nonce too low")]
    NonceTooLow,
    #[error("insufficient funds for asset {asset:?}")]
    InsufficientFunds { asset: AssetId },
    #[error("intrinsic gas too low")]
    IntrinsicGas,
    #[error("gas uint64 overflow")]
    GasOverflow,
    #[error("rw lock poisoned")]
    RwPoison,
    #[error("no active journal")]
    NoActiveJournal,
}
