//! Connection and chain configuration.
//!
//! Grounded on `hyperlane-ethereum`'s `config.rs` (the `RpcConnectionConf`/
//! `ConnectionConf` split) and `lib.rs`'s `ConnectionConf` enum.

use ethers_core::types::Address;
use url::Url;

use crate::types::BlockTag;

/// How to reach the node(s) backing a client.
#[derive(Debug, Clone)]
pub enum ConnectionConf {
    /// A single HTTP endpoint.
    Http { url: Url },
    /// A single WebSocket endpoint (subscriptions available).
    Ws { url: Url },
    /// Multiple HTTP endpoints tried in priority order on failure.
    HttpFallback { urls: Vec<Url> },
}

impl ConnectionConf {
    /// Whether this transport supports `eth_subscribe`.
    pub fn supports_subscription(&self) -> bool {
        matches!(self, ConnectionConf::Ws { .. })
    }
}

/// Per-chain static metadata the engine needs: where Multicall3 lives, and
/// from which block it's safe to call.
#[derive(Debug, Clone, Default)]
pub struct Multicall3Config {
    pub address: Option<Address>,
    pub block_created: Option<u64>,
}

/// Chain-level configuration, analogous to `hyperlane_core::ChainConf`'s
/// `contracts.multicall3` field.
#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub multicall3: Multicall3Config,
}

/// Per-gateway CCIP-Read configuration (ERC-3668).
#[derive(Debug, Clone, Default)]
pub struct CcipReadConfig {
    /// Enable the `OffchainLookup` gateway round-trip on revert.
    pub enabled: bool,
}

/// Client-wide tunables, built with `derive_builder` the way
/// `ethers-prometheus`'s `JsonRpcClientMetrics`/`PrometheusJsonRpcClient`
/// are built.
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), default)]
pub struct ClientConfig {
    /// Experimental default block tag, used when block-ref resolution falls
    /// through a missing explicit tag (`spec.md` §3 invariant).
    pub default_block_tag: Option<BlockTag>,
    /// Polling interval for HTTP-mode watches. `None` defers to the 4s
    /// crate-wide default.
    pub polling_interval: Option<std::time::Duration>,
    /// Whether `call()` may route eligible calls into the multicall batcher.
    pub batch_calls: bool,
    /// Byte threshold for a multicall chunk (`spec.md` §4.2, default 2048).
    pub multicall_batch_size: usize,
    /// Max number of multicall chunks executed concurrently (default 5).
    pub max_concurrent_chunks: usize,
    /// Coalescer wait window (`spec.md` §4.3, minimum 1ms).
    pub coalescer_wait: std::time::Duration,
    pub ccip_read: CcipReadConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_block_tag: None,
            polling_interval: None,
            batch_calls: true,
            multicall_batch_size: 2048,
            max_concurrent_chunks: 5,
            coalescer_wait: std::time::Duration::from_millis(1),
            ccip_read: CcipReadConfig::default(),
        }
    }
}

/// Default polling interval when neither a param nor a client default is set.
pub const DEFAULT_POLLING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(4);
