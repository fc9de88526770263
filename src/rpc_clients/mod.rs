//! Transport-level `JsonRpcClient` wrappers: retry with exponential backoff,
//! and fall back across multiple hosts in priority order.
//!
//! Adapted from `hyperlane-ethereum`'s `rpc_clients/mod.rs`: the response
//! categorization helper is kept verbatim in spirit, trimmed to the methods
//! this crate actually issues (`spec.md` §6).

pub use self::fallback::*;
pub use self::retrying::*;

mod fallback;
mod retrying;

use ethers_providers::HttpClientError;
use tracing::{info, trace, warn};

pub(crate) enum CategorizedResponse<R> {
    IsOk(R),
    RetryableErr(HttpClientError),
    NonRetryableErr(HttpClientError),
}

const METHODS_TO_NOT_RETRY: &[&str] = &["eth_estimateGas"];
const METHOD_TO_NOT_RETRY_WHEN_NOT_SUPPORTED: &[&str] = &["eth_feeHistory"];
const METHODS_TO_NOT_RETRY_ON_REVERT: &[&str] = &["eth_call"];
const METHODS_TO_NOT_RETRY_ON_NONCE_ERROR: &[&str] =
    &["eth_sendRawTransaction", "eth_sendTransaction"];
const METHODS_TO_NOT_RETRY_ON_ALREADY_KNOWN: &[&str] =
    &["eth_sendRawTransaction", "eth_sendTransaction"];

pub(crate) fn categorize_client_response<R>(
    method: &str,
    resp: Result<R, HttpClientError>,
) -> CategorizedResponse<R> {
    match resp {
        Ok(res) => {
            trace!("received Ok response from http client");
            CategorizedResponse::IsOk(res)
        }
        Err(HttpClientError::ReqwestError(e)) => {
            warn!(error=%e, "ReqwestError in http provider");
            CategorizedResponse::RetryableErr(HttpClientError::ReqwestError(e))
        }
        Err(HttpClientError::SerdeJson { err, text }) => {
            warn!(error=%err, text, "SerdeJson error in http provider");
            CategorizedResponse::RetryableErr(HttpClientError::SerdeJson { err, text })
        }
        Err(HttpClientError::JsonRpcError(e)) => {
            let msg = e.message.to_ascii_lowercase();
            if METHODS_TO_NOT_RETRY.contains(&method)
                || (METHOD_TO_NOT_RETRY_WHEN_NOT_SUPPORTED.contains(&method)
                    && msg.contains("support"))
                || (METHODS_TO_NOT_RETRY_ON_REVERT.contains(&method) && msg.contains("revert"))
                || (METHODS_TO_NOT_RETRY_ON_ALREADY_KNOWN.contains(&method)
                    && msg.contains("known"))
                || (METHODS_TO_NOT_RETRY_ON_NONCE_ERROR.contains(&method) && msg.contains("nonce"))
            {
                warn!(error=%e, "non-retryable JsonRpcError in http provider");
                CategorizedResponse::NonRetryableErr(HttpClientError::JsonRpcError(e))
            } else {
                info!(error=%e, "retryable JsonRpcError in http provider");
                CategorizedResponse::RetryableErr(HttpClientError::JsonRpcError(e))
            }
        }
    }
}
