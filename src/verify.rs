//! Signature verification (`spec.md` §4.5): ERC-6492 wrapper unwrap, then
//! ERC-1271 `isValidSignature` via the call engine, falling back to plain
//! ECDSA recovery.

use std::sync::Arc;

use ethers_core::abi::{self, Token};
use ethers_core::types::{Address, Bytes, Signature, H256};
use ethers_providers::Middleware;
use tracing::instrument;

use crate::call::CallEngine;
use crate::config::{ChainConfig, ClientConfig};
use crate::error::{ActionError, ActionResult};
use crate::types::{BlockRef, CallParameters, ClientUid, Deployless};

/// Magic suffix appended to an ERC-6492 wrapped signature:
/// `keccak256("ERC6492")` truncated/rotated per EIP-6492's fixed 32-byte
/// magic value.
const ERC6492_MAGIC_SUFFIX: [u8; 32] = [
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
];

/// Selector of `isValidSignature(bytes32,bytes)`.
const ERC1271_SELECTOR: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];
/// Expected return value prefix of a valid ERC-1271 signature.
const ERC1271_MAGIC_VALUE: [u8; 4] = ERC1271_SELECTOR;

struct Erc6492Wrapper {
    factory: Address,
    factory_data: Bytes,
    inner_signature: Bytes,
}

fn unwrap_erc6492(signature: &[u8]) -> Option<Erc6492Wrapper> {
    if signature.len() < 32 || signature[signature.len() - 32..] != ERC6492_MAGIC_SUFFIX {
        return None;
    }
    let body = &signature[..signature.len() - 32];
    let params = [
        abi::ParamType::Address,
        abi::ParamType::Bytes,
        abi::ParamType::Bytes,
    ];
    let mut tokens = abi::decode(&params, body).ok()?;
    let inner_signature = tokens.remove(2).into_bytes()?;
    let factory_data = tokens.remove(1).into_bytes()?;
    let factory = tokens.remove(0).into_address()?;
    Some(Erc6492Wrapper {
        factory,
        factory_data: factory_data.into(),
        inner_signature: inner_signature.into(),
    })
}

/// Verify a signature over a raw 32-byte digest against `signer`, trying in
/// order: ERC-6492 counterfactual unwrap, ERC-1271 `isValidSignature`, plain
/// ECDSA recovery (`spec.md` §4.5).
#[instrument(skip(provider, chain, config, signature), err)]
pub async fn verify_hash<M>(
    provider: Arc<M>,
    chain: ChainConfig,
    client: ClientUid,
    config: ClientConfig,
    signer: Address,
    hash: H256,
    signature: Bytes,
) -> ActionResult<bool>
where
    M: Middleware + 'static,
{
    let engine = CallEngine::new(provider, chain, client, config);

    if let Some(wrapper) = unwrap_erc6492(&signature) {
        return verify_via_erc1271_or_deploy(&engine, signer, hash, wrapper).await;
    }

    match verify_via_erc1271(&engine, signer, hash, signature.clone()).await {
        Ok(valid) => Ok(valid),
        Err(ActionError::CallExecutionError { .. }) | Err(ActionError::RawContractError(_)) => {
            Ok(verify_via_ecdsa(signer, hash, &signature))
        }
        Err(e) => Err(e),
    }
}

/// EIP-191 personal-message signing: verify over `keccak256("\x19Ethereum
/// Signed Message:\n" || len(message) || message)`.
pub async fn verify_message<M>(
    provider: Arc<M>,
    chain: ChainConfig,
    client: ClientUid,
    config: ClientConfig,
    signer: Address,
    message: &[u8],
    signature: Bytes,
) -> ActionResult<bool>
where
    M: Middleware + 'static,
{
    let hash = ethers_core::utils::hash_message(message);
    verify_hash(provider, chain, client, config, signer, hash, signature).await
}

/// EIP-712 typed-data signing: verify over the domain-separated struct hash.
pub async fn verify_typed_data<M>(
    provider: Arc<M>,
    chain: ChainConfig,
    client: ClientUid,
    config: ClientConfig,
    signer: Address,
    typed_data_hash: H256,
    signature: Bytes,
) -> ActionResult<bool>
where
    M: Middleware + 'static,
{
    verify_hash(provider, chain, client, config, signer, typed_data_hash, signature).await
}

async fn verify_via_erc1271_or_deploy<M>(
    engine: &CallEngine<M>,
    signer: Address,
    hash: H256,
    wrapper: Erc6492Wrapper,
) -> ActionResult<bool>
where
    M: Middleware + 'static,
{
    let call_data = abi::encode(&[
        Token::FixedBytes(hash.as_bytes().to_vec()),
        Token::Bytes(wrapper.inner_signature.to_vec()),
    ]);
    let mut data = ERC1271_SELECTOR.to_vec();
    data.extend(call_data);

    let deployless = Deployless {
        code: None,
        factory: Some(wrapper.factory),
        factory_data: Some(wrapper.factory_data),
    };

    let params = CallParameters {
        to: Some(ethers_core::types::NameOrAddress::Address(signer)),
        data: Some(data.into()),
        block: BlockRef::default(),
        deployless,
        ..Default::default()
    };

    match engine.call(params).await {
        Ok(output) => Ok(is_erc1271_magic_value(&output.data)),
        Err(ActionError::CounterfactualDeploymentFailed { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn verify_via_erc1271<M>(
    engine: &CallEngine<M>,
    signer: Address,
    hash: H256,
    signature: Bytes,
) -> ActionResult<bool>
where
    M: Middleware + 'static,
{
    let call_data = abi::encode(&[
        Token::FixedBytes(hash.as_bytes().to_vec()),
        Token::Bytes(signature.to_vec()),
    ]);
    let mut data = ERC1271_SELECTOR.to_vec();
    data.extend(call_data);

    let params = CallParameters {
        to: Some(ethers_core::types::NameOrAddress::Address(signer)),
        data: Some(data.into()),
        block: BlockRef::default(),
        ..Default::default()
    };

    let output = engine.call(params).await?;
    Ok(is_erc1271_magic_value(&output.data))
}

fn is_erc1271_magic_value(data: &Bytes) -> bool {
    data.len() >= 4 && data[..4] == ERC1271_MAGIC_VALUE
}

fn verify_via_ecdsa(signer: Address, hash: H256, signature: &[u8]) -> bool {
    match Signature::try_from(signature) {
        Ok(sig) => sig.recover(hash).map(|recovered| recovered == signer).unwrap_or(false),
        Err(_) => false,
    }
}

/// Exposed for callers who already have an ERC-6492-wrapped signature and
/// want to inspect its factory without performing verification (e.g. to
/// surface a friendlier error for a not-yet-deployed account).
pub fn factory_wrap_hint(signature: &[u8]) -> Option<Address> {
    unwrap_erc6492(signature).map(|w| w.factory)
}
