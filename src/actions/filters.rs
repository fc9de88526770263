//! Filter lifecycle (`spec.md` §4.6 action catalogue, §3 invariants):
//! create/poll/uninstall for event, block, and pending-transaction filters.
//! A `FilterId` is opaque and server-issued; it expires if not polled within
//! a server-defined idle timeout, and uninstalling it is idempotent —
//! callers may call `uninstall_filter` more than once (e.g. once from normal
//! teardown and once from a cancellation path) without that being an error.

use ethers_core::types::{Filter, Log, TxHash, H256};
use ethers_providers::{FilterKind, Middleware};
use tracing::instrument;

use crate::error::{ActionError, ActionResult};
use crate::types::FilterId;

#[instrument(skip(provider, filter), err)]
pub async fn create_event_filter<M: Middleware>(
    provider: &M,
    filter: &Filter,
) -> ActionResult<FilterId> {
    provider
        .new_filter(FilterKind::Logs(filter))
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn create_block_filter<M: Middleware>(provider: &M) -> ActionResult<FilterId> {
    provider
        .new_filter(FilterKind::NewBlocks)
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn create_pending_transaction_filter<M: Middleware>(
    provider: &M,
) -> ActionResult<FilterId> {
    provider
        .new_filter(FilterKind::PendingTransactions)
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_filter_logs<M: Middleware>(
    provider: &M,
    id: FilterId,
) -> ActionResult<Vec<Log>> {
    provider
        .get_filter_logs(id)
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_event_filter_changes<M: Middleware>(
    provider: &M,
    id: FilterId,
) -> ActionResult<Vec<Log>> {
    provider
        .get_filter_changes(id)
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_block_filter_changes<M: Middleware>(
    provider: &M,
    id: FilterId,
) -> ActionResult<Vec<H256>> {
    provider
        .get_filter_changes(id)
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_pending_transaction_filter_changes<M: Middleware>(
    provider: &M,
    id: FilterId,
) -> ActionResult<Vec<TxHash>> {
    provider
        .get_filter_changes(id)
        .await
        .map_err(ActionError::Provider)
}

/// Uninstall a filter. Idempotent: `eth_uninstallFilter` against an
/// already-uninstalled or expired id still returns `false` rather than an
/// RPC error, so repeated teardown calls are harmless.
#[instrument(skip(provider), err)]
pub async fn uninstall_filter<M: Middleware>(provider: &M, id: FilterId) -> ActionResult<bool> {
    provider.uninstall_filter(id).await.map_err(ActionError::Provider)
}
