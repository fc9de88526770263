//! Typed Ethereum JSON-RPC actions, a multicall aggregation engine, a watch
//! subsystem abstracting polling and push subscriptions, a wait-for-receipt
//! state machine, CCIP-Read-aware calls, and ERC-6492/ERC-1271 signature
//! verification, layered on top of `ethers-providers::Middleware`.
//!
//! Grounded on `hyperlane-ethereum`'s module layout: one concern per module,
//! `rpc_clients` holding the transport-level retry/fallback wrappers, and a
//! single crate-wide error taxonomy in [`error`].

pub mod actions;
pub mod cache;
pub mod call;
pub mod config;
pub mod error;
pub mod multicall;
pub mod rpc_clients;
pub mod types;
pub mod verify;
pub mod wait_for_receipt;
pub mod watch;

pub use call::{CallEngine, CallOutput};
pub use config::{ChainConfig, ClientConfig, ClientConfigBuilder, ConnectionConf};
pub use error::{ActionError, ActionResult, MulticallError, WatchError};
pub use multicall::coalescer::{schedule, schedule_concurrent, CallResult};
pub use multicall::{multicall, CallData, CallOutcome, ContractCallRequest, MulticallParams};
pub use types::{
    BlockRef, BlockTag, BlockWithTxHashes, BlockWithTxs, CallParameters, ClientUid, FilterId,
    ReplacementInfo, ReplacementReason, WatchEvent,
};
pub use wait_for_receipt::{wait_for_transaction_receipt, WaitOutcome, WaitParams};
