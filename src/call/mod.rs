//! The call engine (`spec.md` §4.1) — the hub that validates inputs,
//! optionally wraps calldata for deployless execution, routes eligible calls
//! to the multicall batcher, and on revert decodes `OffchainLookup(...)` to
//! perform the ERC-3668 gateway round trip.

pub mod ccip_read;
pub mod deployless;
pub mod overrides;

use std::sync::Arc;

use ethers_core::types::{Address, Bytes, U256};
use ethers_providers::Middleware;
use serde_json::{json, Value};
use tracing::instrument;

use crate::config::{ChainConfig, ClientConfig};
use crate::error::{ActionError, ActionResult};
use crate::multicall::aggregate3::starts_with_aggregate3_selector;
use crate::multicall::coalescer;
use crate::multicall::{CallOutcome, ContractCallRequest};
use crate::types::{CallParameters, ClientUid};

use self::ccip_read::{
    build_callback_calldata, decode_offchain_lookup, fetch_from_gateways, MAX_CCIP_READ_HOPS,
};
use self::deployless::{apply_deployless, is_counterfactual_deployment_failed};
use self::overrides::{encode_block_override, encode_state_overrides, has_any_overrides};

/// Output of a successful `call()`.
#[derive(Debug, Clone, Default)]
pub struct CallOutput {
    pub data: Bytes,
}

/// The call engine. Generic over the transport middleware; holds just enough
/// state to know whether/how to route into multicall and CCIP-Read.
pub struct CallEngine<M> {
    provider: Arc<M>,
    chain: Arc<ChainConfig>,
    client: ClientUid,
    config: ClientConfig,
    http: reqwest::Client,
}

impl<M> CallEngine<M>
where
    M: Middleware + 'static,
{
    pub fn new(provider: Arc<M>, chain: ChainConfig, client: ClientUid, config: ClientConfig) -> Self {
        Self {
            provider,
            chain: Arc::new(chain),
            client,
            config,
            http: reqwest::Client::new(),
        }
    }

    /// `spec.md` §4.1: validate, wrap, route, execute, and handle reverts.
    #[instrument(skip(self, params), err)]
    pub async fn call(&self, params: CallParameters) -> ActionResult<CallOutput> {
        self.call_inner(params, 0).await
    }

    #[instrument(skip(self, params), err)]
    async fn call_inner(&self, params: CallParameters, ccip_hop: u32) -> ActionResult<CallOutput> {
        validate_call_params(&params)?;

        let to = match &params.to {
            Some(ethers_core::types::NameOrAddress::Address(a)) => Some(*a),
            Some(ethers_core::types::NameOrAddress::Name(_)) => {
                return Err(ActionError::invalid("ENS names are not supported here"))
            }
            None => None,
        };

        let (effective_to, effective_data) =
            apply_deployless(&params.deployless, to, params.data.as_ref())?;

        let has_overrides = has_any_overrides(&params.state_overrides, &params.block_override);

        let eligible_for_multicall = self.config.batch_calls
            && !has_overrides
            && params.gas.is_none()
            && params.gas_price.is_none()
            && params.max_fee_per_gas.is_none()
            && params.max_priority_fee_per_gas.is_none()
            && params.value.is_none()
            && params.nonce.is_none()
            && effective_to.is_some()
            && effective_data.as_ref().is_some_and(|d| !d.is_empty())
            && !effective_data
                .as_ref()
                .map(|d| starts_with_aggregate3_selector(d))
                .unwrap_or(false);

        if eligible_for_multicall {
            let target = effective_to.expect("checked by eligibility above");
            let data = effective_data.clone().expect("checked by eligibility above");
            let contracts = vec![ContractCallRequest::raw(target, data)];

            let outcomes = coalescer::schedule(
                self.provider.clone(),
                self.chain.clone(),
                self.client.clone(),
                Arc::new(self.config.clone()),
                contracts,
                true,
            )
            .await?;

            return match outcomes.into_iter().next() {
                Some(CallOutcome::Success(mut tokens)) => {
                    let data = tokens
                        .pop()
                        .and_then(|t| t.into_bytes())
                        .map(Bytes::from)
                        .unwrap_or_default();
                    Ok(CallOutput { data })
                }
                Some(CallOutcome::Failure(err)) => {
                    let revert_bytes = extract_revert_bytes_from_str(&err.to_string());
                    let fallback = ActionError::RawContractError(err.to_string());
                    self.handle_revert(Some(target), revert_bytes, ccip_hop, &params, fallback)
                        .await
                }
                None => Err(ActionError::invalid(
                    "coalescer returned no result for this call",
                )),
            };
        }

        let result = self
            .execute_eth_call(
                effective_to,
                effective_data.clone(),
                params.value,
                params.block,
                &params.state_overrides,
                params.block_override.as_ref(),
            )
            .await;

        match result {
            Ok(data) => Ok(CallOutput { data }),
            Err(ActionError::CallExecutionError { to, data, cause }) => {
                let revert_bytes = extract_revert_bytes(&cause);
                let fallback = ActionError::CallExecutionError { to, data, cause };
                self.handle_revert(to, revert_bytes, ccip_hop, &params, fallback)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Shared tail of both the direct and coalesced call paths: check for a
    /// counterfactual-deployment revert, then an ERC-3668 `OffchainLookup`
    /// revert, falling back to `fallback` if neither matches.
    async fn handle_revert(
        &self,
        to: Option<Address>,
        revert_bytes: Option<Vec<u8>>,
        ccip_hop: u32,
        params: &CallParameters,
        fallback: ActionError,
    ) -> ActionResult<CallOutput> {
        if let Some(bytes) = &revert_bytes {
            if is_counterfactual_deployment_failed(bytes) && params.deployless.code.is_some() {
                return Err(ActionError::CounterfactualDeploymentFailed {
                    factory: params.deployless.factory.unwrap_or_default(),
                });
            }
            if self.config.ccip_read.enabled {
                if let Some(lookup) = decode_offchain_lookup(bytes) {
                    if ccip_hop >= MAX_CCIP_READ_HOPS {
                        return Err(ActionError::OffchainLookup(
                            "max CCIP-Read hops exceeded".into(),
                        ));
                    }
                    let original_to = to.ok_or_else(|| {
                        ActionError::invalid("OffchainLookup requires a call target")
                    })?;
                    if lookup.sender != original_to {
                        return Err(ActionError::OffchainLookupSenderMismatch {
                            sender: lookup.sender,
                            to: original_to,
                        });
                    }
                    let response = fetch_from_gateways(&self.http, &lookup).await?;
                    let callback_data = build_callback_calldata(&lookup, response);
                    let mut retried = params.clone();
                    retried.data = Some(callback_data);
                    return Box::pin(self.call_inner(retried, ccip_hop + 1)).await;
                }
            }
        }
        Err(fallback)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_eth_call(
        &self,
        to: Option<Address>,
        data: Option<Bytes>,
        value: Option<U256>,
        block: crate::types::BlockRef,
        state_overrides: &[(Address, crate::types::StateOverride)],
        block_override: Option<&crate::types::BlockOverride>,
    ) -> ActionResult<Bytes> {
        let mut tx = json!({});
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        if let Some(data) = &data {
            tx["data"] = json!(data);
        }
        if let Some(value) = value {
            tx["value"] = json!(value);
        }

        let block_id = block.to_block_id();
        let mut params: Vec<Value> = vec![tx, json!(block_id)];

        if !state_overrides.is_empty() || block_override.is_some() {
            let mut override_obj = if state_overrides.is_empty() {
                json!({})
            } else {
                encode_state_overrides(state_overrides)
            };
            if let Some(bo) = block_override {
                override_obj["blockOverrides"] = encode_block_override(bo);
            }
            params.push(override_obj);
        }

        match raw_request::<M, Bytes, _>(self.provider.as_ref(), "eth_call", params).await {
            Ok(data) => Ok(if data.0.is_empty() { Bytes::default() } else { data }),
            Err(cause) => Err(ActionError::CallExecutionError {
                to,
                data: data.map(|d| d.to_string()).unwrap_or_default(),
                cause,
            }),
        }
    }
}

fn validate_call_params(params: &CallParameters) -> ActionResult<()> {
    let has_code = params.deployless.code.is_some();
    let has_factory = params.deployless.factory.is_some() || params.deployless.factory_data.is_some();
    if has_code && (params.to.is_some() || has_factory) {
        return Err(ActionError::invalid(
            "`code` is mutually exclusive with both `to` and `{factory, factoryData}`",
        ));
    }
    if let (Some(max_fee), Some(max_priority_fee)) =
        (params.max_fee_per_gas, params.max_priority_fee_per_gas)
    {
        if max_priority_fee > max_fee {
            return Err(ActionError::invalid(
                "maxPriorityFeePerGas must not exceed maxFeePerGas",
            ));
        }
    }
    Ok(())
}

/// Issue a raw JSON-RPC request through a `Middleware`'s inner provider,
/// bypassing `Middleware::call` entirely. Shared by the call engine and the
/// multicall engine's chunk executor so the two never re-enter each other
/// (`SPEC_FULL.md`/`spec.md` §9's cyclic-dependency note).
pub(crate) async fn raw_request<M, R, T>(
    provider: &M,
    method: &str,
    params: T,
) -> Result<R, ethers_providers::ProviderError>
where
    M: Middleware,
    R: serde::de::DeserializeOwned + Send,
    T: serde::Serialize + Send + Sync,
{
    provider.provider().request(method, params).await
}

/// Extract revert bytes from a provider error, preferring a structured
/// `error.data` field and falling back to the fragile "longest `0x`-prefixed
/// hex substring in the message" heuristic (`spec.md` §4.1 step 4, §9 note).
pub fn extract_revert_bytes(err: &ethers_providers::ProviderError) -> Option<Vec<u8>> {
    if let ethers_providers::ProviderError::JsonRpcClientError(inner) = err {
        let msg = inner.to_string();
        return extract_revert_bytes_from_str(&msg);
    }
    extract_revert_bytes_from_str(&err.to_string())
}

fn extract_revert_bytes_from_str(msg: &str) -> Option<Vec<u8>> {
    let mut best: Option<&str> = None;
    let bytes = msg.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'0' && bytes[i + 1] == b'x' {
            let rest = &msg[i..];
            let end = rest
                .char_indices()
                .skip(2)
                .find(|(_, c)| !c.is_ascii_hexdigit())
                .map(|(idx, _)| idx)
                .unwrap_or(rest.len());
            let candidate = &rest[..end];
            if best.map(|b| candidate.len() > b.len()).unwrap_or(true) {
                best = Some(candidate);
            }
            i += end;
        } else {
            i += 1;
        }
    }
    best.and_then(|s| hex::decode(s.trim_start_matches("0x")).ok())
}
