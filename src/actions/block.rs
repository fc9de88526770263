//! Block accessors (`spec.md` §4.6 action catalogue): fetch by hash or
//! number, optionally with full transaction bodies, and the cached
//! `get_block_number` entry point.

use std::time::Duration;

use ethers_providers::Middleware;
use tracing::instrument;

use crate::cache;
use crate::error::{ActionError, ActionResult};
use crate::types::{BlockRef, BlockWithTxHashes, BlockWithTxs, ClientUid};

/// TTL for the cached `eth_blockNumber` result (`spec.md` §5: "a small
/// process-wide block-number cache keyed by client UID with TTL").
const BLOCK_NUMBER_CACHE_TTL: Duration = Duration::from_millis(500);

/// `eth_blockNumber`, served from the process-wide TTL cache (`spec.md` §5).
#[instrument(skip(provider), err)]
pub async fn get_block_number<M: Middleware>(
    provider: &M,
    client: &ClientUid,
) -> ActionResult<u64> {
    cache::get_block_number(client, BLOCK_NUMBER_CACHE_TTL, || {
        let provider = provider.provider().clone();
        async move {
            provider
                .request::<_, ethers_core::types::U64>("eth_blockNumber", ())
                .await
        }
    })
    .await
    .map(|n| n.as_u64())
    .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_block<M: Middleware>(
    provider: &M,
    block: BlockRef,
) -> ActionResult<BlockWithTxHashes> {
    provider
        .get_block(block.to_block_id())
        .await
        .map_err(ActionError::Provider)?
        .ok_or(ActionError::BlockNotFound {
            hash: match block {
                BlockRef::Hash(h) => Some(h),
                _ => None,
            },
            number: match block {
                BlockRef::Number(n) => Some(n.into()),
                _ => None,
            },
        })
}

#[instrument(skip(provider), err)]
pub async fn get_block_with_transactions<M: Middleware>(
    provider: &M,
    block: BlockRef,
) -> ActionResult<BlockWithTxs> {
    provider
        .get_block_with_txs(block.to_block_id())
        .await
        .map_err(ActionError::Provider)?
        .ok_or(ActionError::BlockNotFound {
            hash: match block {
                BlockRef::Hash(h) => Some(h),
                _ => None,
            },
            number: match block {
                BlockRef::Number(n) => Some(n.into()),
                _ => None,
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers_providers::{JsonRpcClient, Provider};
    use serde::de::DeserializeOwned;
    use serde_json::json;

    #[derive(Clone)]
    struct NullBlockMock;

    #[async_trait]
    impl JsonRpcClient for NullBlockMock {
        type Error = ethers_providers::HttpClientError;

        async fn request<T, R>(&self, method: &str, _params: T) -> Result<R, Self::Error>
        where
            T: serde::Serialize + Send + Sync,
            R: DeserializeOwned + Send,
        {
            assert!(method.starts_with("eth_getBlockBy"));
            Ok(serde_json::from_value(json!(null)).unwrap())
        }
    }

    #[tokio::test]
    async fn missing_block_surfaces_not_found() {
        let provider = Provider::new(NullBlockMock);
        let err = get_block(&provider, BlockRef::Number(5)).await.unwrap_err();
        assert!(matches!(err, ActionError::BlockNotFound { number: Some(n), .. } if n == 5u64.into()));
    }
}
