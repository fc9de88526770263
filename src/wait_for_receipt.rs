//! Wait-for-receipt state machine (`spec.md` §4.4.8): poll for a receipt,
//! detect and classify a replacement transaction if the original nonce was
//! consumed by something else, and track confirmation depth.

use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::{Transaction, TransactionReceipt, TxHash};
use ethers_providers::Middleware;
use tracing::instrument;

use crate::error::{ActionError, ActionResult};
use crate::types::{ReplacementInfo, ReplacementReason};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Bounded retry schedule for the original-transaction lookup: up to 6
/// attempts, backing off `(1 << n) * 200ms` (`spec.md` §4.4.8 step 3 — "if
/// the original transaction is not yet known, try `eth_getTransactionByHash`
/// with bounded retry"). This guards only the initial lookup; the
/// replacement-detection block scan that runs on every `Searching` tick is a
/// single best-effort attempt, relying on the outer poll interval for
/// pacing instead of its own backoff.
const ORIGINAL_TX_RETRY_COUNT: u32 = 6;
const ORIGINAL_TX_RETRY_BASE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct WaitParams {
    pub confirmations: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitParams {
    fn default() -> Self {
        Self {
            confirmations: 1,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// The original transaction was mined and reached the requested depth.
    Confirmed(TransactionReceipt),
    /// A replacement (repriced, cancelled, or otherwise replaced) transaction
    /// was mined instead, and reached the requested depth.
    Replaced(ReplacementInfo),
}

/// States of the machine described in `spec.md` §4.4.8: `Searching` for a
/// receipt, `HaveReceipt` waiting for enough confirmations,
/// `DetectedReplacement` waiting for the replacement's confirmations, and the
/// terminal `Confirmed`/`TimedOut`.
enum State {
    Searching,
    HaveReceipt(TransactionReceipt),
    DetectedReplacement(ReplacementInfo),
}

#[instrument(skip(provider), err)]
pub async fn wait_for_transaction_receipt<M>(
    provider: Arc<M>,
    tx_hash: TxHash,
    params: WaitParams,
) -> ActionResult<WaitOutcome>
where
    M: Middleware + 'static,
{
    let original_tx = fetch_original_tx_with_retry(provider.as_ref(), tx_hash).await?;

    let deadline = tokio::time::Instant::now() + params.timeout;
    let mut state = State::Searching;

    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(ActionError::WaitForTransactionReceiptTimeout(tx_hash));
        }

        match &state {
            State::Searching => {
                match provider
                    .get_transaction_receipt(tx_hash)
                    .await
                    .map_err(ActionError::Provider)?
                {
                    Some(receipt) => state = State::HaveReceipt(receipt),
                    None => {
                        if let Some(original_tx) = &original_tx {
                            if let Some(info) =
                                detect_replacement(provider.as_ref(), original_tx, tx_hash).await?
                            {
                                state = State::DetectedReplacement(info);
                                continue;
                            }
                        }
                    }
                }
            }
            State::HaveReceipt(receipt) | State::DetectedReplacement(ReplacementInfo { receipt, .. }) => {
                let current_block = provider
                    .get_block_number()
                    .await
                    .map_err(ActionError::Provider)?
                    .as_u64();
                let mined_at = receipt
                    .block_number
                    .map(|n| n.as_u64())
                    .unwrap_or(current_block);
                let confirmations = current_block.saturating_sub(mined_at) + 1;

                if confirmations >= params.confirmations {
                    return Ok(match &state {
                        State::DetectedReplacement(info) => WaitOutcome::Replaced(info.clone()),
                        _ => WaitOutcome::Confirmed(receipt.clone()),
                    });
                }
            }
        }

        tokio::time::sleep(params.poll_interval).await;
    }
}

/// Fetch the original transaction, retrying with bounded backoff while it
/// isn't known yet — the node it was submitted to may not have propagated
/// it across the network the instant it was sent (`spec.md` §4.4.8 step 3).
async fn fetch_original_tx_with_retry<M: Middleware>(
    provider: &M,
    tx_hash: TxHash,
) -> ActionResult<Option<Transaction>> {
    for attempt in 0..ORIGINAL_TX_RETRY_COUNT {
        if let Some(tx) = provider
            .get_transaction(tx_hash)
            .await
            .map_err(ActionError::Provider)?
        {
            return Ok(Some(tx));
        }
        if attempt + 1 < ORIGINAL_TX_RETRY_COUNT {
            let backoff = ORIGINAL_TX_RETRY_BASE * (1u32 << attempt);
            tokio::time::sleep(backoff).await;
        }
    }
    Ok(None)
}

/// Scan the current block for a transaction from the same sender consuming
/// the same nonce. A single best-effort attempt per call — this runs once
/// per `Searching` tick, so the outer `poll_interval` sleep already paces
/// retries; an internal backoff here would inflate that cadence (`spec.md`
/// §4.4.8 step 4).
async fn detect_replacement<M: Middleware>(
    provider: &M,
    original_tx: &Transaction,
    original_hash: TxHash,
) -> ActionResult<Option<ReplacementInfo>> {
    let current_block = provider
        .get_block_number()
        .await
        .map_err(ActionError::Provider)?;

    if let Ok(Some(block)) = provider
        .get_block_with_txs(ethers_core::types::BlockId::Number(
            ethers_core::types::BlockNumber::Number(current_block),
        ))
        .await
    {
        for candidate in &block.transactions {
            if candidate.hash == original_hash {
                continue;
            }
            if candidate.from == original_tx.from && candidate.nonce == original_tx.nonce {
                let receipt = provider
                    .get_transaction_receipt(candidate.hash)
                    .await
                    .map_err(ActionError::Provider)?;
                if let Some(receipt) = receipt {
                    return Ok(Some(ReplacementInfo {
                        reason: classify_replacement(original_tx, candidate),
                        original_hash,
                        replacement_hash: candidate.hash,
                        receipt,
                    }));
                }
            }
        }
    }

    Ok(None)
}

/// `spec.md` §4.4.8 step 5: classify *why* a transaction was replaced.
/// Repriced if `to`/`value`/`input` are unchanged; cancelled if the
/// replacement is a zero-value self-send; otherwise replaced.
fn classify_replacement(original: &Transaction, replacement: &Transaction) -> ReplacementReason {
    let same_payload = original.to == replacement.to
        && original.value == replacement.value
        && original.input == replacement.input;
    if same_payload {
        return ReplacementReason::Repriced;
    }

    let sent_to_self = replacement.to == Some(replacement.from);
    let zero_value = replacement.value.is_zero();
    if sent_to_self && zero_value {
        return ReplacementReason::Cancelled;
    }

    ReplacementReason::Replaced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repriced_when_payload_unchanged() {
        let mut original = Transaction::default();
        original.to = Some(ethers_core::types::Address::repeat_byte(1));
        original.value = 5u64.into();
        original.input = vec![1, 2, 3].into();

        let mut replacement = original.clone();
        replacement.hash = ethers_core::types::H256::repeat_byte(9);

        assert_eq!(
            classify_replacement(&original, &replacement),
            ReplacementReason::Repriced
        );
    }

    #[test]
    fn cancelled_when_self_send_zero_value() {
        let from = ethers_core::types::Address::repeat_byte(2);
        let mut original = Transaction::default();
        original.from = from;
        original.to = Some(ethers_core::types::Address::repeat_byte(1));
        original.value = 5u64.into();

        let mut replacement = Transaction::default();
        replacement.from = from;
        replacement.to = Some(from);
        replacement.value = 0u64.into();

        assert_eq!(
            classify_replacement(&original, &replacement),
            ReplacementReason::Cancelled
        );
    }

    #[test]
    fn replaced_otherwise() {
        let mut original = Transaction::default();
        original.to = Some(ethers_core::types::Address::repeat_byte(1));
        original.value = 5u64.into();

        let mut replacement = Transaction::default();
        replacement.to = Some(ethers_core::types::Address::repeat_byte(3));
        replacement.value = 7u64.into();

        assert_eq!(
            classify_replacement(&original, &replacement),
            ReplacementReason::Replaced
        );
    }
}
