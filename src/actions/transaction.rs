//! Transaction accessors (`spec.md` §4.6 action catalogue): by hash, or by
//! block plus index.

use ethers_core::types::{Transaction, TxHash};
use ethers_providers::Middleware;
use tracing::instrument;

use crate::error::{ActionError, ActionResult};
use crate::types::BlockRef;

#[instrument(skip(provider), err)]
pub async fn get_transaction<M: Middleware>(
    provider: &M,
    hash: TxHash,
) -> ActionResult<Transaction> {
    provider
        .get_transaction(hash)
        .await
        .map_err(ActionError::Provider)?
        .ok_or(ActionError::TransactionNotFound(hash))
}

#[instrument(skip(provider), err)]
pub async fn get_transaction_by_block_and_index<M: Middleware>(
    provider: &M,
    block: BlockRef,
    index: u64,
) -> ActionResult<Transaction> {
    let block_with_txs = provider
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
        })?;

    block_with_txs
        .transactions
        .into_iter()
        .nth(index as usize)
        .ok_or(ActionError::TransactionNotFound(TxHash::zero()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers_providers::{JsonRpcClient, Provider};
    use serde::de::DeserializeOwned;
    use serde_json::json;

    #[derive(Clone)]
    struct NullTxMock;

    #[async_trait]
    impl JsonRpcClient for NullTxMock {
        type Error = ethers_providers::HttpClientError;

        async fn request<T, R>(&self, method: &str, _params: T) -> Result<R, Self::Error>
        where
            T: serde::Serialize + Send + Sync,
            R: DeserializeOwned + Send,
        {
            assert_eq!(method, "eth_getTransactionByHash");
            Ok(serde_json::from_value(json!(null)).unwrap())
        }
    }

    #[tokio::test]
    async fn missing_transaction_surfaces_not_found() {
        let provider = Provider::new(NullTxMock);
        let hash = TxHash::repeat_byte(3);
        let err = get_transaction(&provider, hash).await.unwrap_err();
        assert!(matches!(err, ActionError::TransactionNotFound(h) if h == hash));
    }
}
