use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use ethers_providers::{Http, JsonRpcClient, ProviderError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument, trace};

use crate::rpc_clients::{categorize_client_response, CategorizedResponse};

/// An HTTP provider with a simple naive exponential backoff built in.
///
/// Adapted from `hyperlane-ethereum`'s `RetryingProvider`, trimmed to the
/// plain `ethers_providers::Http` transport this crate targets (the teacher
/// also specialized it for its own `PrometheusJsonRpcClient` wrapper, which
/// this crate does not carry — see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct RetryingProvider<P> {
    max_requests: u32,
    base_retry_ms: u64,
    inner: P,
}

impl<P> RetryingProvider<P> {
    /// Instantiate a `RetryingProvider`. `max_requests` defaults to 6,
    /// `base_retry_ms` to 50, matching the teacher's defaults.
    pub fn new(inner: P, max_requests: Option<u32>, base_retry_ms: Option<u64>) -> Self {
        Self {
            inner,
            max_requests: max_requests.unwrap_or(6),
            base_retry_ms: base_retry_ms.unwrap_or(50),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn base_retry_ms(&self) -> u64 {
        self.base_retry_ms
    }
}

enum HandleMethod<R, PE> {
    Accept(R),
    Halt(PE),
    Retry(PE),
}

impl<P> RetryingProvider<P>
where
    P: JsonRpcClient,
{
    #[instrument(skip_all, fields(method = %method))]
    async fn request_with_retry<T, R>(
        &self,
        method: &str,
        params: T,
        matcher: impl Fn(Result<R, P::Error>, u32, u64) -> HandleMethod<R, P::Error>,
    ) -> Result<R, RetryingProviderError<P>>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).expect("params must serialize");

        let mut last_err;
        let mut i = 1;
        loop {
            let backoff_ms = self.base_retry_ms * 2u64.pow(i - 1);
            debug!(attempt = i, "dispatching request");

            let fut = match params {
                Value::Null => self.inner.request(method, ()),
                _ => self.inner.request(method, &params),
            };

            match matcher(fut.await, i, backoff_ms) {
                HandleMethod::Accept(v) => return Ok(v),
                HandleMethod::Halt(e) => return Err(RetryingProviderError::JsonRpcClientError(e)),
                HandleMethod::Retry(e) => last_err = e,
            }

            i += 1;
            if i <= self.max_requests {
                trace!(backoff_ms, "retrying provider going to sleep");
                sleep(Duration::from_millis(backoff_ms)).await;
            } else {
                return Err(RetryingProviderError::MaxRequests(last_err));
            }
        }
    }
}

/// Error type for `RetryingProvider`.
#[derive(Error, Debug)]
pub enum RetryingProviderError<P>
where
    P: JsonRpcClient,
{
    #[error(transparent)]
    JsonRpcClientError(P::Error),
    #[error("hit max requests")]
    MaxRequests(P::Error),
}

impl<P> From<RetryingProviderError<P>> for ProviderError
where
    P: JsonRpcClient + 'static,
    <P as JsonRpcClient>::Error: Send + Sync,
{
    fn from(src: RetryingProviderError<P>) -> Self {
        ProviderError::JsonRpcClientError(Box::new(src))
    }
}

#[async_trait]
impl JsonRpcClient for RetryingProvider<Http> {
    type Error = RetryingProviderError<Http>;

    #[instrument(skip(self))]
    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        use CategorizedResponse::*;
        use HandleMethod::*;

        self.request_with_retry::<T, R>(method, params, |res, _attempt, _next_backoff_ms| {
            match categorize_client_response(method, res) {
                IsOk(res) => Accept(res),
                RetryableErr(e) => Retry(e),
                NonRetryableErr(e) => Halt(e),
            }
        })
        .await
    }
}
