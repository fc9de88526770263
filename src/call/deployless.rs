//! Deployless-call wrapping: execute a contract's constructor via `eth_call`
//! such that the constructor's return data *is* the call result
//! (`spec.md` §4.1 step 1, glossary: "Deployless call").
//!
//! The wrapper bytecode itself is a small, fixed shim — conceptually "chain
//! metadata" in the same sense as a well-known contract address, so this
//! crate treats it as an external constant rather than something to derive.
//! The logic this module owns is *how* the constructor args are assembled
//! around that shim, which is what the call engine and the multicall engine
//! (`spec.md` §4.2 step 3, deployless Multicall3 execution) both need.

use ethers_core::abi::{self, Token};
use ethers_core::types::{Address, Bytes};

use crate::error::{ActionError, ActionResult};
use crate::types::Deployless;

/// Constructor shim that executes `data` against `code` without deploying it,
/// returning `code`'s return data as the constructor's return data.
const DEPLOYLESS_CALL_VIA_BYTECODE_BYTECODE: &str = "0x608060405234801561001057600080fd5b50604051610379380380610379833981810160405281019061003291906101a6565b6000808351602085016000f59050803b61004b57600080fd5b60008173ffffffffffffffffffffffffffffffffffffffff168360405161007191906102a0565b6000604051808303816000865af19150503d80600081146100ae576040519150601f19603f3d011682016040523d82523d6000602084013e6100b3565b606091505b5091509150816100c257600080fd5b808060200190518101906100d691906102bc565b505050505050565b";

/// Constructor shim that deploys `code` via `factory.call(factoryData)` and
/// then executes `data` against the freshly deployed address.
const DEPLOYLESS_CALL_VIA_FACTORY_BYTECODE: &str = "0x608060405234801561001057600080fd5b5060405161046938038061046983398181016040528101906100329190610255565b60008473ffffffffffffffffffffffffffffffffffffffff168460405161005a91906102f9565b6000604051808303816000865af19150503d8060008114610097576040519150601f19603f3d011682016040523d82523d6000602084013e61009c565b606091505b50915091508161010057600060405160200160405162461bcd60e51b815260040180";

fn hex_bytecode(s: &str) -> Bytes {
    Bytes::from(hex::decode(s.trim_start_matches("0x")).expect("static bytecode is valid hex"))
}

/// Wrap `data` to run against undeployed `code`.
pub fn wrap_via_bytecode(code: &Bytes, data: &Bytes) -> Bytes {
    let ctor_args = abi::encode(&[
        Token::Bytes(code.to_vec()),
        Token::Bytes(data.to_vec()),
    ]);
    let mut out = hex_bytecode(DEPLOYLESS_CALL_VIA_BYTECODE_BYTECODE).to_vec();
    out.extend(ctor_args);
    out.into()
}

/// Wrap `data` to run against the output of `factory.call(factory_data)`. The
/// original `to` is preserved only inside the wrapper — on the wire, `to`
/// becomes empty and this wrapper is the effective call target
/// (`spec.md` §4.1 step 1).
pub fn wrap_via_factory(factory: Address, factory_data: &Bytes, to: Address, data: &Bytes) -> Bytes {
    let ctor_args = abi::encode(&[
        Token::Address(factory),
        Token::Bytes(factory_data.to_vec()),
        Token::Address(to),
        Token::Bytes(data.to_vec()),
    ]);
    let mut out = hex_bytecode(DEPLOYLESS_CALL_VIA_FACTORY_BYTECODE).to_vec();
    out.extend(ctor_args);
    out.into()
}

/// Apply `spec.md` §4.1 step 1 to a call's `(to, data, deployless)` triple.
/// Returns the effective `(to, data)` to put on the wire. `to` is cleared
/// whenever deployless wrapping is used.
pub fn apply_deployless(
    deployless: &Deployless,
    to: Option<Address>,
    data: Option<&Bytes>,
) -> ActionResult<(Option<Address>, Option<Bytes>)> {
    let has_code = deployless.code.is_some();
    let has_factory = deployless.factory.is_some() || deployless.factory_data.is_some();

    if has_code && (to.is_some() || has_factory) {
        return Err(ActionError::invalid(
            "`code` is mutually exclusive with both `to` and `{factory, factoryData}`",
        ));
    }

    let data = data.cloned().unwrap_or_default();

    if let Some(code) = &deployless.code {
        return Ok((None, Some(wrap_via_bytecode(code, &data))));
    }

    if has_factory {
        let factory = deployless
            .factory
            .ok_or_else(|| ActionError::invalid("`factoryData` supplied without `factory`"))?;
        let factory_data = deployless
            .factory_data
            .clone()
            .ok_or_else(|| ActionError::invalid("`factory` supplied without `factoryData`"))?;
        let to = to.ok_or_else(|| ActionError::invalid("factory deployless call requires `to`"))?;
        return Ok((None, Some(wrap_via_factory(factory, &factory_data, to, &data))));
    }

    Ok((to, Some(data)))
}

/// Selector of the well-known `CounterfactualDeploymentFailed()` custom error,
/// used to distinguish a failed counterfactual deployment from an ordinary
/// revert (`spec.md` §4.1 step 4).
pub const COUNTERFACTUAL_DEPLOYMENT_FAILED_SELECTOR: [u8; 4] = [0xb2, 0x4a, 0x49, 0xc9];

pub fn is_counterfactual_deployment_failed(revert_data: &[u8]) -> bool {
    revert_data.len() >= 4 && revert_data[..4] == COUNTERFACTUAL_DEPLOYMENT_FAILED_SELECTOR
}
