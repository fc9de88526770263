//! The multicall coalescer (`spec.md` §4.3): merges independently-scheduled
//! calls issued within a short time window into a single multicall, keyed
//! per client (`spec.md` §5: "one coalescer per client").

use std::collections::HashMap;
use std::sync::Arc;

use ethers_providers::Middleware;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Duration;

use crate::config::{ChainConfig, ClientConfig};
use crate::error::{ActionError, ActionResult};
use crate::types::{BlockRef, ClientUid};

use super::{multicall, CallOutcome, ContractCallRequest, MulticallParams};

/// Result of coalescing a caller's batch: one [`CallOutcome`] per contract in
/// the order the caller submitted them.
pub type CallResult = ActionResult<Vec<CallOutcome>>;

struct PendingEntry {
    contracts: Vec<ContractCallRequest>,
    reply: oneshot::Sender<Vec<CallOutcome>>,
}

struct CoalescerState {
    pending: Vec<PendingEntry>,
    timer_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Default for CoalescerState {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            timer_handle: None,
        }
    }
}

/// Process-wide map of per-client coalescer state (`spec.md` §5).
static COALESCERS: Lazy<Mutex<HashMap<ClientUid, Arc<Mutex<CoalescerState>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn state_for(client: &ClientUid) -> Arc<Mutex<CoalescerState>> {
    let mut map = COALESCERS.lock();
    map.entry(client.clone())
        .or_insert_with(|| Arc::new(Mutex::new(CoalescerState::default())))
        .clone()
}

/// Drop every client's coalescer state. Test-only; production code never
/// needs to reset the process-wide map.
#[cfg(test)]
pub fn reset_all() {
    COALESCERS.lock().clear();
}

/// Schedule a batch of calls for coalescing (`spec.md` §4.3's `contracts`
/// array per caller, not one call at a time):
/// - fast path: if no entries are pending and no timer is running, flush
///   immediately (a lone caller shouldn't pay the coalescing window's latency).
/// - otherwise the batch joins the pending window and a timer is armed if one
///   isn't already running.
pub async fn schedule<M>(
    provider: Arc<M>,
    chain: Arc<ChainConfig>,
    client: ClientUid,
    config: Arc<ClientConfig>,
    contracts: Vec<ContractCallRequest>,
    allow_failure: bool,
) -> CallResult
where
    M: Middleware + 'static,
{
    let state = state_for(&client);
    let (tx, rx) = oneshot::channel();

    let should_flush_immediately = {
        let mut guard = state.lock();
        let is_empty = guard.pending.is_empty();
        guard.pending.push(PendingEntry { contracts, reply: tx });
        if is_empty && guard.timer_handle.is_none() {
            true
        } else {
            arm_timer_if_needed(&state, &provider, &chain, &config);
            false
        }
    };

    if should_flush_immediately {
        flush(&state, provider.as_ref(), chain.as_ref(), config.as_ref()).await;
    }

    resolve(rx.await, allow_failure)
}

/// Always joins the current window, even when it would otherwise be empty
/// (`spec.md` §4.3 `scheduleConcurrent`): useful for callers issuing many
/// batches back-to-back in the same tick, who want every one of them merged.
pub async fn schedule_concurrent<M>(
    provider: Arc<M>,
    chain: Arc<ChainConfig>,
    client: ClientUid,
    config: Arc<ClientConfig>,
    contracts: Vec<ContractCallRequest>,
    allow_failure: bool,
) -> CallResult
where
    M: Middleware + 'static,
{
    let state = state_for(&client);
    let (tx, rx) = oneshot::channel();

    let batch_size_breached = {
        let mut guard = state.lock();
        guard.pending.push(PendingEntry { contracts, reply: tx });
        let breached = guard.pending.len() >= config.multicall_batch_size;
        if !breached {
            arm_timer_if_needed(&state, &provider, &chain, &config);
        }
        breached
    };

    if batch_size_breached {
        flush(&state, provider.as_ref(), chain.as_ref(), config.as_ref()).await;
    }

    resolve(rx.await, allow_failure)
}

/// Translate a coalesced batch's outcomes into this caller's own
/// `allowFailure` expectation: a caller that asked for `allowFailure=false`
/// gets a hard error on the first failing position; one that asked for
/// `true` gets every position back, successes and failures alike.
fn resolve(
    received: Result<Vec<CallOutcome>, oneshot::error::RecvError>,
    allow_failure: bool,
) -> CallResult {
    match received {
        Ok(outcomes) => {
            if !allow_failure {
                if let Some(err) = outcomes.iter().find_map(|o| match o {
                    CallOutcome::Failure(e) => Some(e.clone()),
                    CallOutcome::Success(_) => None,
                }) {
                    return Err(ActionError::RawContractError(err.to_string()));
                }
            }
            Ok(outcomes)
        }
        Err(_) => Err(ActionError::invalid("coalescer dropped the reply channel")),
    }
}

fn arm_timer_if_needed<M>(
    state: &Arc<Mutex<CoalescerState>>,
    provider: &Arc<M>,
    chain: &Arc<ChainConfig>,
    config: &Arc<ClientConfig>,
) where
    M: Middleware + 'static,
{
    let mut guard = state.lock();
    if guard.timer_handle.is_some() {
        return;
    }
    let wait = config.coalescer_wait.max(Duration::from_millis(1));
    let state = state.clone();
    let provider = provider.clone();
    let chain = chain.clone();
    let config = config.clone();
    guard.timer_handle = Some(tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        flush(&state, provider.as_ref(), chain.as_ref(), config.as_ref()).await;
    }));
}

/// Stop the timer, snapshot and clear pending entries, flatten every caller's
/// `contracts` into one merged multicall with `allowFailure=true` forced, and
/// slice the combined result back into each caller's own sub-range, in order
/// (`spec.md` §4.3).
async fn flush<M>(
    state: &Arc<Mutex<CoalescerState>>,
    provider: &M,
    chain: &ChainConfig,
    config: &ClientConfig,
) where
    M: Middleware + 'static,
{
    let entries = {
        let mut guard = state.lock();
        if let Some(handle) = guard.timer_handle.take() {
            handle.abort();
        }
        std::mem::take(&mut guard.pending)
    };

    if entries.is_empty() {
        return;
    }

    let mut contracts: Vec<ContractCallRequest> = Vec::new();
    let mut ranges: Vec<(usize, usize)> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let start = contracts.len();
        contracts.extend(entry.contracts.iter().cloned());
        ranges.push((start, contracts.len()));
    }

    let mut params = MulticallParams::new(contracts, config);
    params.allow_failure = true;
    params.block = BlockRef::default();

    let outcomes = multicall(provider, chain, params, None).await;

    match outcomes {
        Ok(outcomes) => {
            for (entry, (start, end)) in entries.into_iter().zip(ranges) {
                let slice = outcomes[start..end].to_vec();
                let _ = entry.reply.send(slice);
            }
        }
        Err(err) => {
            let shared = Arc::new(err);
            for entry in entries {
                let filled = entry
                    .contracts
                    .iter()
                    .map(|_| CallOutcome::Failure(shared.clone()))
                    .collect();
                let _ = entry.reply.send(filled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::abi::Abi;
    use ethers_core::types::{Address, Bytes};
    use async_trait::async_trait;
    use ethers_core::abi::Token;
    use ethers_providers::{JsonRpcClient, Provider};
    use serde::de::DeserializeOwned;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Default)]
    struct ProviderMock {
        call_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JsonRpcClient for ProviderMock {
        type Error = ethers_providers::HttpClientError;

        async fn request<T, R>(&self, method: &str, _params: T) -> Result<R, Self::Error>
        where
            T: serde::Serialize + Send + Sync,
            R: DeserializeOwned + Send,
        {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            assert_eq!(method, "eth_call");
            // one successful Aggregate3Result per pending entry isn't known
            // here, so tests instead assert on call_count / timing behavior.
            let empty: Vec<Value> = Vec::new();
            let v = serde_json::to_value(empty).unwrap();
            Ok(serde_json::from_value(v).unwrap())
        }
    }

    fn dummy_abi() -> Arc<Abi> {
        let json = r#"[{"type":"function","name":"foo","inputs":[],"outputs":[{"type":"uint256"}],"stateMutability":"view"}]"#;
        Arc::new(serde_json::from_str(json).unwrap())
    }

    #[tokio::test]
    async fn lone_call_flushes_immediately_without_waiting_for_timer() {
        reset_all();
        let mock = ProviderMock::default();
        let provider = Arc::new(Provider::new(mock.clone()));
        let chain = Arc::new(ChainConfig::default());
        let config = Arc::new(ClientConfig {
            coalescer_wait: Duration::from_secs(60),
            ..Default::default()
        });
        let client = ClientUid::from("test-client-1");

        let contracts = vec![ContractCallRequest::abi_call(
            Address::repeat_byte(1),
            dummy_abi(),
            "foo",
            vec![],
        )];

        let fut = schedule(provider, chain, client, config, contracts, true);
        let result = tokio::time::timeout(Duration::from_millis(500), fut)
            .await
            .expect("fast path must not wait for the coalescing timer");
        // The empty-array mock produces a length mismatch against one input,
        // which the multicall engine surfaces as a decode/shape error; the
        // important assertion is that this resolved well before the 60s timer.
        let _ = result;
    }

    #[test]
    fn client_uid_round_trips_through_map_key() {
        reset_all();
        let a = ClientUid::from("same");
        let b = ClientUid::from("same");
        let s1 = state_for(&a);
        let s2 = state_for(&b);
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[derive(Debug, Clone)]
    struct FixedAggregate3Mock {
        response: Bytes,
    }

    #[async_trait]
    impl JsonRpcClient for FixedAggregate3Mock {
        type Error = ethers_providers::HttpClientError;

        async fn request<T, R>(&self, method: &str, _params: T) -> Result<R, Self::Error>
        where
            T: serde::Serialize + Send + Sync,
            R: DeserializeOwned + Send,
        {
            assert_eq!(method, "eth_call");
            let v = serde_json::json!(format!("0x{}", hex::encode(&self.response)));
            Ok(serde_json::from_value(v).unwrap())
        }
    }

    /// Three concurrent callers with 10/20/30 raw contracts each, scheduled
    /// back-to-back via `schedule_concurrent`, must each get back exactly
    /// their own slice, in their own original order, out of one merged
    /// multicall (`spec.md` §4.3).
    #[tokio::test]
    async fn three_concurrent_callers_receive_their_own_slice_in_order() {
        reset_all();

        let sizes = [10usize, 20, 30];
        let total: usize = sizes.iter().sum();

        let results: Vec<Token> = (0..total)
            .map(|i| {
                Token::Tuple(vec![
                    Token::Bool(true),
                    Token::Bytes(vec![i as u8]),
                ])
            })
            .collect();
        let encoded = ethers_core::abi::encode(&[Token::Array(results)]);

        let mock = FixedAggregate3Mock {
            response: Bytes::from(encoded),
        };
        let provider = Arc::new(Provider::new(mock));
        let chain = Arc::new(ChainConfig::default());
        let config = Arc::new(ClientConfig {
            coalescer_wait: Duration::from_millis(20),
            multicall_batch_size: 1_000_000,
            ..Default::default()
        });
        let client = ClientUid::from("three-callers");

        let batch_for = |size: usize, offset: usize| -> Vec<ContractCallRequest> {
            (0..size)
                .map(|i| {
                    ContractCallRequest::raw(
                        Address::repeat_byte((offset + i) as u8),
                        Bytes::default(),
                    )
                })
                .collect()
        };

        let fut_a = schedule_concurrent(
            provider.clone(),
            chain.clone(),
            client.clone(),
            config.clone(),
            batch_for(sizes[0], 0),
            true,
        );
        let fut_b = schedule_concurrent(
            provider.clone(),
            chain.clone(),
            client.clone(),
            config.clone(),
            batch_for(sizes[1], sizes[0]),
            true,
        );
        let fut_c = schedule_concurrent(
            provider.clone(),
            chain.clone(),
            client.clone(),
            config.clone(),
            batch_for(sizes[2], sizes[0] + sizes[1]),
            true,
        );

        let (a, b, c) = tokio::join!(fut_a, fut_b, fut_c);
        let a = a.expect("caller A");
        let b = b.expect("caller B");
        let c = c.expect("caller C");

        assert_eq!(a.len(), sizes[0]);
        assert_eq!(b.len(), sizes[1]);
        assert_eq!(c.len(), sizes[2]);

        let expect_byte = |outcome: &CallOutcome, expected: u8| match outcome {
            CallOutcome::Success(tokens) => {
                assert_eq!(tokens, &vec![Token::Bytes(vec![expected])]);
            }
            CallOutcome::Failure(e) => panic!("expected success, got {e}"),
        };

        for (i, outcome) in a.iter().enumerate() {
            expect_byte(outcome, i as u8);
        }
        for (i, outcome) in b.iter().enumerate() {
            expect_byte(outcome, (sizes[0] + i) as u8);
        }
        for (i, outcome) in c.iter().enumerate() {
            expect_byte(outcome, (sizes[0] + sizes[1] + i) as u8);
        }
    }
}
