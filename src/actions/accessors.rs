//! Straight RPC shims (`spec.md` §4.6 action catalogue): thin, typed
//! wrappers around single JSON-RPC calls with no batching, caching, or
//! multi-step logic of their own.

use ethers_core::types::{
    transaction::eip2930::AccessListWithGasUsed, Address, Bytes, EIP1186ProofResponse, U256, U64,
};
use ethers_providers::Middleware;
use tracing::instrument;

use crate::error::{ActionError, ActionResult};
use crate::types::{BlockRef, CallParameters};

#[instrument(skip(provider), err)]
pub async fn get_balance<M: Middleware>(
    provider: &M,
    address: Address,
    block: BlockRef,
) -> ActionResult<U256> {
    provider
        .get_balance(address, Some(block.to_block_id()))
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_code<M: Middleware>(
    provider: &M,
    address: Address,
    block: BlockRef,
) -> ActionResult<Bytes> {
    provider
        .get_code(address, Some(block.to_block_id()))
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_storage_at<M: Middleware>(
    provider: &M,
    address: Address,
    slot: ethers_core::types::H256,
    block: BlockRef,
) -> ActionResult<ethers_core::types::H256> {
    provider
        .get_storage_at(address, slot, Some(block.to_block_id()))
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_chain_id<M: Middleware>(provider: &M) -> ActionResult<U256> {
    provider.get_chainid().await.map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_gas_price<M: Middleware>(provider: &M) -> ActionResult<U256> {
    provider.get_gas_price().await.map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_max_priority_fee_per_gas<M: Middleware>(provider: &M) -> ActionResult<U256> {
    provider
        .provider()
        .request("eth_maxPriorityFeePerGas", ())
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_transaction_count<M: Middleware>(
    provider: &M,
    address: Address,
    block: BlockRef,
) -> ActionResult<U256> {
    provider
        .get_transaction_count(address, Some(block.to_block_id()))
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider), err)]
pub async fn get_proof<M: Middleware>(
    provider: &M,
    address: Address,
    storage_keys: Vec<ethers_core::types::H256>,
    block: BlockRef,
) -> ActionResult<EIP1186ProofResponse> {
    provider
        .get_proof(address, storage_keys, Some(block.to_block_id()))
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider, params), err)]
pub async fn estimate_gas<M: Middleware>(
    provider: &M,
    params: &CallParameters,
) -> ActionResult<U256> {
    let tx = call_params_to_typed_tx(params);
    provider
        .estimate_gas(&tx, Some(params.block.to_block_id()))
        .await
        .map_err(ActionError::Provider)
}

#[instrument(skip(provider, params), err)]
pub async fn create_access_list<M: Middleware>(
    provider: &M,
    params: &CallParameters,
) -> ActionResult<AccessListWithGasUsed> {
    let tx = call_params_to_typed_tx(params);
    provider
        .create_access_list(&tx, Some(params.block.to_block_id()))
        .await
        .map_err(ActionError::Provider)
}

fn call_params_to_typed_tx(params: &CallParameters) -> ethers_core::types::transaction::eip2718::TypedTransaction {
    use ethers_core::types::transaction::eip1559::Eip1559TransactionRequest;
    use ethers_core::types::transaction::eip2718::TypedTransaction;

    let mut req = Eip1559TransactionRequest::new();
    if let Some(from) = params.from {
        req = req.from(from);
    }
    if let Some(to) = params.to.clone() {
        req = req.to(to);
    }
    if let Some(data) = params.data.clone() {
        req = req.data(data);
    }
    if let Some(value) = params.value {
        req = req.value(value);
    }
    if let Some(gas) = params.gas {
        req = req.gas(gas);
    }
    if let Some(max_fee) = params.max_fee_per_gas {
        req = req.max_fee_per_gas(max_fee);
    }
    if let Some(max_priority_fee) = params.max_priority_fee_per_gas {
        req = req.max_priority_fee_per_gas(max_priority_fee);
    }
    if let Some(nonce) = params.nonce {
        req = req.nonce(U64::from(nonce));
    }
    if let Some(access_list) = params.access_list.clone() {
        req = req.access_list(access_list);
    }

    TypedTransaction::Eip1559(req)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_tx_carries_call_target_and_data() {
        let params = CallParameters {
            to: Some(ethers_core::types::NameOrAddress::Address(Address::repeat_byte(1))),
            data: Some(Bytes::from(vec![1, 2, 3])),
            ..Default::default()
        };
        let tx = call_params_to_typed_tx(&params);
        assert_eq!(tx.to_addr().copied(), Some(Address::repeat_byte(1)));
        assert_eq!(tx.data().cloned(), Some(Bytes::from(vec![1, 2, 3])));
    }
}
