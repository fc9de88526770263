//! One-shot `eth_getLogs` (`spec.md` §4.6 action catalogue), distinct from
//! the long-running event watch in `crate::watch::events`.

use ethers_core::types::{Filter, Log};
use ethers_providers::Middleware;
use tracing::instrument;

use crate::error::{ActionError, ActionResult};

#[instrument(skip(provider, filter), err)]
pub async fn get_logs<M: Middleware>(provider: &M, filter: &Filter) -> ActionResult<Vec<Log>> {
    provider.get_logs(filter).await.map_err(ActionError::Provider)
}
