//! State/block override serialization to the node's RPC shape
//! (`spec.md` §4.1 step 2).

use std::collections::BTreeMap;

use ethers_core::types::{Address, H256, U256, U64};
use serde::Serialize;
use serde_json::Value;

use crate::types::{BlockOverride, StateOverride};

#[derive(Serialize)]
struct StateOverrideWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<BTreeMap<H256, H256>>,
    #[serde(rename = "stateDiff", skip_serializing_if = "Option::is_none")]
    state_diff: Option<BTreeMap<H256, H256>>,
}

/// Build the `eth_call` 3rd-positional-argument state override map.
pub fn encode_state_overrides(overrides: &[(Address, StateOverride)]) -> Value {
    let map: BTreeMap<Address, StateOverrideWire> = overrides
        .iter()
        .map(|(addr, o)| {
            (
                *addr,
                StateOverrideWire {
                    nonce: o.nonce.map(U64::from),
                    code: o.code.as_ref().map(|c| c.to_string()),
                    balance: o.balance,
                    state: o.state.as_ref().map(|s| s.iter().cloned().collect()),
                    state_diff: o.state_diff.as_ref().map(|s| s.iter().cloned().collect()),
                },
            )
        })
        .collect();
    serde_json::to_value(map).expect("state override map must serialize")
}

#[derive(Serialize)]
struct BlockOverrideWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<U64>,
    #[serde(rename = "gasLimit", skip_serializing_if = "Option::is_none")]
    gas_limit: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    coinbase: Option<Address>,
    #[serde(rename = "baseFee", skip_serializing_if = "Option::is_none")]
    base_fee_per_gas: Option<U256>,
    #[serde(rename = "blobBaseFee", skip_serializing_if = "Option::is_none")]
    blob_base_fee: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    random: Option<H256>,
}

/// Build the `eth_call` block-override argument.
pub fn encode_block_override(o: &BlockOverride) -> Value {
    let wire = BlockOverrideWire {
        number: o.number.map(U64::from),
        time: o.time.map(U64::from),
        gas_limit: o.gas_limit.map(U64::from),
        coinbase: o.coinbase,
        base_fee_per_gas: o.base_fee_per_gas,
        blob_base_fee: o.blob_base_fee,
        random: o.random,
    };
    serde_json::to_value(wire).expect("block override must serialize")
}

/// Presence of either overrides suppresses multicall routing (`spec.md`
/// §4.1 step 3).
pub fn has_any_overrides(
    state_overrides: &[(Address, StateOverride)],
    block_override: &Option<BlockOverride>,
) -> bool {
    !state_overrides.is_empty() || block_override.is_some()
}
