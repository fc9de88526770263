//! Core data model shared by the call engine, multicall engine, and watch
//! subsystem. Concrete types are bound to `ethers-core` rather than
//! re-invented, per `SPEC_FULL.md` §3.

use std::sync::Arc;

use ethers_core::abi::Address;
use ethers_core::types::{
    Block, Bytes, NameOrAddress, TransactionReceipt, TxHash, H256, U256, U64,
};
use serde::{Deserialize, Serialize};

/// Opaque, cheaply-cloneable identifier for a client instance. Used as the
/// key for the process-wide block-number cache, multicall coalescer map,
/// and watch observer registries (`spec.md` §5).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientUid(Arc<str>);

impl ClientUid {
    /// Build a new client identifier, e.g. from a chain id plus RPC host.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ClientUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientUid {
    fn from(s: &str) -> Self {
        Self::new(Arc::from(s))
    }
}

/// One of `latest | pending | earliest | safe | finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTag {
    #[default]
    Latest,
    Pending,
    Earliest,
    Safe,
    Finalized,
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockTag::Latest => "latest",
            BlockTag::Pending => "pending",
            BlockTag::Earliest => "earliest",
            BlockTag::Safe => "safe",
            BlockTag::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// `latest | pending | earliest | safe | finalized | <number>`. Exactly one
/// of `{hash, number, tag}` is meaningful per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// A specific block number.
    Number(u64),
    /// A block hash.
    Hash(H256),
    /// A named tag.
    Tag(BlockTag),
}

impl Default for BlockRef {
    fn default() -> Self {
        BlockRef::Tag(BlockTag::default())
    }
}

impl BlockRef {
    /// Resolve per `spec.md`'s invariant: a numeric block wins; else the
    /// caller-supplied tag; else the client's experimental default tag; else
    /// `latest`.
    pub fn resolve(
        number: Option<u64>,
        tag: Option<BlockTag>,
        client_default_tag: Option<BlockTag>,
    ) -> BlockRef {
        if let Some(n) = number {
            return BlockRef::Number(n);
        }
        if let Some(t) = tag {
            return BlockRef::Tag(t);
        }
        if let Some(t) = client_default_tag {
            return BlockRef::Tag(t);
        }
        BlockRef::Tag(BlockTag::Latest)
    }

    /// Render as the `ethers-core` block-id type used by `Middleware` calls.
    pub fn to_block_id(self) -> ethers_core::types::BlockId {
        match self {
            BlockRef::Number(n) => ethers_core::types::BlockId::Number(
                ethers_core::types::BlockNumber::Number(n.into()),
            ),
            BlockRef::Hash(h) => ethers_core::types::BlockId::Hash(h),
            BlockRef::Tag(BlockTag::Latest) => {
                ethers_core::types::BlockId::Number(ethers_core::types::BlockNumber::Latest)
            }
            BlockRef::Tag(BlockTag::Pending) => {
                ethers_core::types::BlockId::Number(ethers_core::types::BlockNumber::Pending)
            }
            BlockRef::Tag(BlockTag::Earliest) => {
                ethers_core::types::BlockId::Number(ethers_core::types::BlockNumber::Earliest)
            }
            BlockRef::Tag(BlockTag::Safe) => {
                ethers_core::types::BlockId::Number(ethers_core::types::BlockNumber::Safe)
            }
            BlockRef::Tag(BlockTag::Finalized) => {
                ethers_core::types::BlockId::Number(ethers_core::types::BlockNumber::Finalized)
            }
        }
    }
}

/// The unit of multicall work: `{target, allowFailure, callData}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call3 {
    pub target: Address,
    pub allow_failure: bool,
    pub call_data: Bytes,
}

/// Raw `aggregate3` return element: `{success, returnData}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate3Result {
    pub success: bool,
    pub return_data: Bytes,
}

/// Per-address state override used by `eth_call`.
#[derive(Debug, Clone, Default)]
pub struct StateOverride {
    pub nonce: Option<u64>,
    pub code: Option<Bytes>,
    pub balance: Option<U256>,
    /// Full storage replacement (mutually exclusive with `state_diff`).
    pub state: Option<Vec<(H256, H256)>>,
    /// Sparse storage patch (mutually exclusive with `state`).
    pub state_diff: Option<Vec<(H256, H256)>>,
}

/// Block-level override used by `eth_call`.
#[derive(Debug, Clone, Default)]
pub struct BlockOverride {
    pub number: Option<u64>,
    pub time: Option<u64>,
    pub gas_limit: Option<u64>,
    pub coinbase: Option<Address>,
    pub base_fee_per_gas: Option<U256>,
    pub blob_base_fee: Option<U256>,
    pub random: Option<H256>,
}

/// Deployless-call fields: execute `data` against bytecode that is never
/// deployed, or against a factory's freshly-deployed output.
#[derive(Debug, Clone, Default)]
pub struct Deployless {
    pub code: Option<Bytes>,
    pub factory: Option<Address>,
    pub factory_data: Option<Bytes>,
}

/// Full EVM call specification accepted by the call engine.
#[derive(Debug, Clone, Default)]
pub struct CallParameters {
    pub from: Option<Address>,
    pub to: Option<NameOrAddress>,
    pub data: Option<Bytes>,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub nonce: Option<u64>,
    pub access_list: Option<ethers_core::types::transaction::eip2930::AccessList>,
    pub block: BlockRef,
    pub state_overrides: Vec<(Address, StateOverride)>,
    pub block_override: Option<BlockOverride>,
    pub deployless: Deployless,
}

/// Reason a replacement transaction was mined in place of the original, per
/// `spec.md` §4.4.8 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementReason {
    /// Same `to`/`value`/`input` — only fee parameters changed.
    Repriced,
    /// Sent to self with `value == 0`.
    Cancelled,
    /// Anything else.
    Replaced,
}

/// Result of replacement detection in the wait-for-receipt state machine.
#[derive(Debug, Clone)]
pub struct ReplacementInfo {
    pub reason: ReplacementReason,
    pub original_hash: TxHash,
    pub replacement_hash: TxHash,
    pub receipt: TransactionReceipt,
}

/// Every watch stream carries either a payload or an error; errors never
/// terminate the stream on their own (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Value(T),
    Error(Arc<str>),
}

impl<T> WatchEvent<T> {
    pub fn value(v: T) -> Self {
        WatchEvent::Value(v)
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        WatchEvent::Error(Arc::from(msg.to_string()))
    }
}

/// A raw log plus optional decoded contract-event data.
#[derive(Debug, Clone)]
pub struct ContractEventLog<T> {
    pub log: ethers_core::types::Log,
    pub event_name: Option<&'static str>,
    pub decoded: Option<T>,
}

/// A full block, as returned by `eth_getBlockByHash`/`eth_getBlockByNumber`.
pub type BlockWithTxHashes = Block<TxHash>;
/// A full block with full transaction bodies (`includeTransactions: true`).
pub type BlockWithTxs = Block<ethers_core::types::Transaction>;

/// Server-issued filter id, opaque to the caller. Invalid if not polled
/// within a server-defined idle timeout; uninstalling is idempotent.
pub type FilterId = U256;
