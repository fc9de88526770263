use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ethers_providers::{HttpClientError, JsonRpcClient, ProviderError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::rpc_clients::{categorize_client_response, CategorizedResponse};

/// A provider that bundles multiple hosts and attempts each in priority
/// order, falling forward on failure. Priority order is fixed at
/// construction; unlike `hyperlane-ethereum`'s `EthereumFallbackProvider`
/// this crate does not reorder hosts on a stall (`spec.md` never asks for
/// that), it simply trips to the next host on a retryable error.
///
/// Grounded on `rpc_clients/fallback.rs::EthereumFallbackProvider` and
/// `ethers-fallback::FallbackProvider`.
#[derive(Debug)]
pub struct FallbackProvider<C> {
    providers: Vec<C>,
    /// Index of the host most recently observed to succeed; new requests
    /// start from here so a degraded primary doesn't eat the latency of
    /// every request.
    last_good: AtomicUsize,
}

impl<C> FallbackProvider<C> {
    pub fn new(providers: Vec<C>) -> Self {
        assert!(!providers.is_empty(), "fallback provider needs >=1 host");
        Self {
            providers,
            last_good: AtomicUsize::new(0),
        }
    }

    pub fn providers(&self) -> &[C] {
        &self.providers
    }
}

/// Error thrown when every host in a `FallbackProvider` failed.
#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("all providers failed (errors: {0:?})")]
    AllProvidersFailed(Vec<HttpClientError>),
}

impl From<FallbackError> for ProviderError {
    fn from(src: FallbackError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(src))
    }
}

#[async_trait]
impl<C> JsonRpcClient for FallbackProvider<C>
where
    C: JsonRpcClient<Error = HttpClientError> + Debug,
{
    type Error = ProviderError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        use CategorizedResponse::*;

        let params = serde_json::to_value(params).expect("params must serialize");
        let start = self.last_good.load(Ordering::Relaxed);
        let n = self.providers.len();

        let mut errors = Vec::new();
        for offset in 0..n {
            let idx = (start + offset) % n;
            let provider = &self.providers[idx];
            let fut = match &params {
                Value::Null => provider.request(method, ()),
                _ => provider.request(method, &params),
            };

            match categorize_client_response(method, fut.await) {
                IsOk(v) => {
                    self.last_good.store(idx, Ordering::Relaxed);
                    return Ok(serde_json::from_value(v)?);
                }
                RetryableErr(e) | NonRetryableErr(e) => {
                    warn!(error=%e, provider_index=%idx, method, "provider query failed, falling back");
                    errors.push(e);
                }
            }
        }

        Err(FallbackError::AllProvidersFailed(errors).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct ProviderMock {
        requests: Arc<Mutex<Vec<(String, String)>>>,
        fail_next: Arc<Mutex<usize>>,
    }

    impl ProviderMock {
        fn new(fail_next: usize) -> Self {
            Self {
                requests: Arc::new(Mutex::new(vec![])),
                fail_next: Arc::new(Mutex::new(fail_next)),
            }
        }

        fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl JsonRpcClient for ProviderMock {
        type Error = HttpClientError;

        async fn request<T: Debug + Serialize + Send + Sync, R: DeserializeOwned>(
            &self,
            method: &str,
            params: T,
        ) -> Result<R, Self::Error> {
            self.requests
                .lock()
                .unwrap()
                .push((method.to_owned(), format!("{:?}", params)));
            let mut remaining = self.fail_next.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HttpClientError::SerdeJson {
                    err: serde_json::from_str::<()>("not json").unwrap_err(),
                    text: "boom".into(),
                });
            }
            serde_json::from_str("1").map_err(|e| HttpClientError::SerdeJson {
                err: e,
                text: "".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn first_provider_is_attempted() {
        let a = ProviderMock::new(0);
        let b = ProviderMock::new(0);
        let fallback = FallbackProvider::new(vec![a.clone(), b.clone()]);
        fallback.request::<_, u64>("eth_blockNumber", ()).await.unwrap();
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_on_failure() {
        let a = ProviderMock::new(1);
        let b = ProviderMock::new(0);
        let fallback = FallbackProvider::new(vec![a.clone(), b.clone()]);
        fallback.request::<_, u64>("eth_blockNumber", ()).await.unwrap();
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test]
    async fn all_providers_failing_surfaces_error() {
        let a = ProviderMock::new(10);
        let b = ProviderMock::new(10);
        let fallback = FallbackProvider::new(vec![a, b]);
        let res = fallback.request::<_, u64>("eth_blockNumber", ()).await;
        assert!(res.is_err());
    }
}
