//! Crate-wide error taxonomy.
//!
//! Mirrors `hyperlane-ethereum`'s `error.rs`: a small `thiserror` enum per
//! concern that wraps the underlying provider error, rather than a single
//! flat error type or an `anyhow`/`eyre` catch-all.

use ethers_core::types::{Address, H256, U64};
use ethers_providers::ProviderError;
use thiserror::Error;

/// Errors surfaced by the call engine, multicall engine, watch subsystem,
/// and wait-for-receipt state machine.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Mutually exclusive or missing call inputs (fail-fast, no I/O performed).
    #[error("invalid call parameters: {0}")]
    InvalidCallParams(String),

    /// An `eth_call` failed for a reason other than CCIP-Read or counterfactual
    /// deployment failure.
    #[error("execution reverted calling {to:?} with data {data}: {cause}")]
    CallExecutionError {
        /// Call target, if any (empty for deployless calls).
        to: Option<Address>,
        /// Calldata actually sent on the wire.
        data: String,
        /// Underlying transport error.
        #[source]
        cause: ProviderError,
    },

    /// Unparsed revert bytes, surfaced as-is (multicall sub-call failure, or a
    /// revert reason that could not be decoded against the target ABI).
    #[error("contract reverted with raw data {0}")]
    RawContractError(String),

    /// A deployless/counterfactual deployment itself reverted.
    #[error("counterfactual deployment via factory {factory:?} failed")]
    CounterfactualDeploymentFailed {
        /// The factory address that was invoked.
        factory: Address,
    },

    /// `eth_getBlockByHash`/`eth_getBlockByNumber` returned null.
    #[error("block not found (hash={hash:?}, number={number:?})")]
    BlockNotFound {
        /// Queried hash, if that's how the block was requested.
        hash: Option<H256>,
        /// Queried number, if that's how the block was requested.
        number: Option<U64>,
    },

    /// `eth_getTransactionByHash` (or by block+index) returned null.
    #[error("transaction not found: {0:?}")]
    TransactionNotFound(H256),

    /// `eth_getTransactionReceipt` returned null when a receipt was required.
    #[error("transaction receipt not found for {0:?}")]
    TransactionReceiptNotFound(H256),

    /// No chain configuration is registered for the client's chain id.
    #[error("chain not configured")]
    ChainNotConfigured,

    /// The configured contract (e.g. Multicall3) does not exist yet at the
    /// requested block on this chain.
    #[error("chain {chain_id} does not support contract {contract} at block {block_number:?}")]
    ChainDoesNotSupportContract {
        /// Chain id.
        chain_id: u64,
        /// Human-readable contract name, e.g. `"multicall3"`.
        contract: &'static str,
        /// Block the call was attempted at, if known.
        block_number: Option<u64>,
    },

    /// `waitForTransactionReceipt` exceeded its timeout before a receipt (or a
    /// confirmed replacement) was observed.
    #[error("timed out waiting for receipt of {0:?}")]
    WaitForTransactionReceiptTimeout(H256),

    /// Fee multiplier was < 1, which would produce a `maxFeePerGas` below
    /// base fee.
    #[error("fee multiplier must be >= 1, got {multiplier}")]
    BaseFeeScalar {
        /// The offending multiplier, rendered as a decimal string.
        multiplier: String,
    },

    /// The CCIP-Read revert's `sender` did not match the call's `to`.
    #[error("OffchainLookup sender {sender:?} does not match call target {to:?}")]
    OffchainLookupSenderMismatch {
        /// Sender the gateway claims to be verifying.
        sender: Address,
        /// The original call target.
        to: Address,
    },

    /// The CCIP-Read gateway round trip failed.
    #[error("offchain lookup failed: {0}")]
    OffchainLookup(String),

    /// Any other transport-level failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ActionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ActionError::InvalidCallParams(msg.into())
    }
}

/// Errors specific to the multicall batching engine.
#[derive(Debug, Error)]
pub enum MulticallError {
    /// ABI-encoding an individual call failed.
    #[error("failed to encode call at index {index}: {source}")]
    Encode {
        /// Index of the failing call in the caller's input vector.
        index: usize,
        /// Underlying ABI error.
        source: ethers_core::abi::Error,
    },
    /// A chunk-level RPC call failed; every call in that chunk fails with this.
    #[error("chunk execution failed: {0}")]
    ChunkExecution(#[from] ActionError),
    /// `aggregate3`'s return data could not be decoded.
    #[error("failed to decode aggregate3 result: {0}")]
    Decode(String),
    /// Resolving the Multicall3 address failed.
    #[error(transparent)]
    Resolution(#[from] Box<ActionError>),
}

/// Errors specific to the watch subsystem.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The underlying transport request for a single poll failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// A server-side filter expired or was never found.
    #[error("filter not found")]
    FilterNotFound,
    /// The watch's setup callback failed (e.g. could not create a filter and
    /// getLogs fallback is unavailable).
    #[error("watch setup failed: {0}")]
    Setup(String),
}

/// Convenience alias used throughout the crate.
pub type ActionResult<T> = Result<T, ActionError>;
