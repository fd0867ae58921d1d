//! Error types for the message-stream codec.

use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, BmsError>;

/// Errors surfaced by the codec core and its collaborators.
///
/// The codec recovers from nothing; every failure propagates to the caller
/// with its reason attached.
#[derive(Debug, Error)]
pub enum BmsError {
    /// Wallet balance below the minimum budget.
    #[error("insufficient funds: need {need} sat, have {have} sat")]
    InsufficientFunds {
        /// Amount needed.
        need: u64,
        /// Amount available.
        have: u64,
    },

    /// Payload does not fit in the maximum chain depth.
    #[error("payload exceeds maximum chain depth of {max_depth} transactions")]
    CapacityExceeded {
        /// The configured depth cap that was hit.
        max_depth: usize,
    },

    /// Extracted transaction features do not decode back to a bit stream.
    #[error("channel decode failed: {0}")]
    ChannelDecode(String),

    /// The wallet or the local signer refused to sign.
    #[error("signature generation failed: {0}")]
    SignatureFailure(String),

    /// An RPC call to the wallet failed.
    #[error("wallet RPC failed: {0}")]
    Rpc(String),

    /// Missing file, missing key, or malformed value in the configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A predecessor transaction cannot be fetched or does not link.
    #[error("transaction chain link broken: {0}")]
    ChainLinkBroken(String),

    /// Rejection sampling (keypair-table grind or payload-pubkey synthesis)
    /// hit its attempt cap without producing a valid key.
    #[error("key rejection sampling exhausted its attempt budget")]
    KeypairGenFailed,

    /// Filesystem error while loading or persisting an artifact.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
