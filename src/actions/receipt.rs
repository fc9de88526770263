//! Receipt accessors (`spec.md` §4.6 action catalogue): the raw receipt, and
//! confirmation-depth derived from it.

use ethers_core::types::{TransactionReceipt, TxHash};
use ethers_providers::Middleware;
use tracing::instrument;

use crate::error::{ActionError, ActionResult};

#[instrument(skip(provider), err)]
pub async fn get_transaction_receipt<M: Middleware>(
    provider: &M,
    hash: TxHash,
) -> ActionResult<TransactionReceipt> {
    provider
        .get_transaction_receipt(hash)
        .await
        .map_err(ActionError::Provider)?
        .ok_or(ActionError::TransactionReceiptNotFound(hash))
}

/// Number of blocks mined on top of the receipt's block, inclusive of the
/// receipt's own block (a transaction mined in the latest block has one
/// confirmation). Returns `0` iff the transaction has no receipt yet, i.e.
/// is still pending (`spec.md` §3 invariant).
#[instrument(skip(provider), err)]
pub async fn get_transaction_confirmations<M: Middleware>(
    provider: &M,
    hash: TxHash,
) -> ActionResult<u64> {
    let receipt = provider
        .get_transaction_receipt(hash)
        .await
        .map_err(ActionError::Provider)?;
    let mined_at = match receipt.and_then(|r| r.block_number) {
        Some(n) => n.as_u64(),
        None => return Ok(0),
    };
    let current = provider
        .get_block_number()
        .await
        .map_err(ActionError::Provider)?
        .as_u64();
    Ok(current.saturating_sub(mined_at) + 1)
}
