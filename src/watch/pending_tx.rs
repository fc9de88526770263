//! Pending-transaction watch (`spec.md` §4.4.7): subscribes to
//! `newPendingTransactions` over a WS/IPC transport, or polls
//! `eth_newPendingTransactionFilter` + `eth_getFilterChanges` over HTTP.
//! Hashes are delivered in batches of up to 100, or every 100ms, whichever
//! comes first.

use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::TxHash;
use ethers_providers::Middleware;
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ConnectionConf;
use crate::types::{ClientUid, WatchEvent};

use super::batch::collect_batches;
use super::observer::{Listener, Observer, ObserverReceiver};
use super::{observer_key, resolve_transport_mode, TransportMode};

const BATCH_SIZE: usize = 100;
const BATCH_WAIT: Duration = Duration::from_millis(100);

static OBSERVER: Lazy<Observer<WatchEvent<Vec<TxHash>>>> = Lazy::new(Observer::new);

pub struct PendingTxWatchParams {
    pub client: ClientUid,
    pub connection: ConnectionConf,
    pub poll_override: Option<bool>,
    pub poll_interval: Duration,
}

/// Poll-mode source: `eth_newPendingTransactionFilter` then repeated
/// `eth_getFilterChanges`.
async fn poll_source<M: Middleware>(
    provider: Arc<M>,
    poll_interval: Duration,
    raw_tx: mpsc::UnboundedSender<TxHash>,
) {
    let filter_id = match provider
        .new_filter(ethers_providers::FilterKind::NewPendingTransactions)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "failed to create pending-transaction filter");
            return;
        }
    };

    let mut tick = tokio::time::interval(poll_interval);
    loop {
        tick.tick().await;
        match provider.get_filter_changes::<_, TxHash>(filter_id).await {
            Ok(hashes) => {
                for h in hashes {
                    if raw_tx.send(h).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "eth_getFilterChanges failed for pending-transaction filter");
            }
        }
    }
}

/// Watch pending transaction hashes, batched (`spec.md` §4.4.7, §4.6.2).
/// Subscription mode is not wired through this polling adapter — a
/// subscription-capable transport delivers hashes directly and only needs
/// the same batching stage, so callers on a WS/IPC transport should feed
/// `ethers_providers::SubscriptionStream` output straight into
/// `crate::watch::batch::collect_batches` instead of this function.
pub fn watch_pending_transactions_polling<M>(
    provider: Arc<M>,
    params: PendingTxWatchParams,
) -> (
    Listener<WatchEvent<Vec<TxHash>>>,
    ObserverReceiver<WatchEvent<Vec<TxHash>>>,
)
where
    M: Middleware + 'static,
{
    let mode = resolve_transport_mode(&params.connection, params.poll_override, None);
    if mode == TransportMode::Subscribe {
        debug!(
            "pending-transaction watch resolved to subscribe mode; no pubsub \
             transport is wired in this crate yet, polling instead (see DESIGN.md)"
        );
    }

    let key = observer_key(
        &params.client,
        "pending_tx",
        &params.poll_interval.as_millis().to_string(),
    );
    let key_for_emit: Arc<str> = Arc::from(key.as_str());
    let poll_interval = params.poll_interval;

    OBSERVER.subscribe(key, move || {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Vec<TxHash>>();

        let source_handle = tokio::spawn(poll_source(provider, poll_interval, raw_tx));
        let batch_handle = tokio::spawn(collect_batches(raw_rx, batch_tx, BATCH_SIZE, BATCH_WAIT));

        let key_for_emit = key_for_emit.clone();
        let forward_handle = tokio::spawn(async move {
            while let Some(batch) = batch_rx.recv().await {
                OBSERVER.emit(&key_for_emit, WatchEvent::value(batch));
            }
        });

        Box::new(move || {
            source_handle.abort();
            batch_handle.abort();
            forward_handle.abort();
        }) as Box<dyn FnOnce() + Send>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers_providers::{JsonRpcClient, Provider};
    use serde::de::DeserializeOwned;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use url::Url;

    #[derive(Clone)]
    struct PendingTxMock {
        polls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl JsonRpcClient for PendingTxMock {
        type Error = ethers_providers::HttpClientError;

        async fn request<T, R>(&self, method: &str, _params: T) -> Result<R, Self::Error>
        where
            T: serde::Serialize + Send + Sync,
            R: DeserializeOwned + Send,
        {
            let v = match method {
                "eth_newPendingTransactionFilter" => json!("0x1"),
                "eth_getFilterChanges" => {
                    let n = self.polls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        json!([format!("0x{}", "22".repeat(32))])
                    } else {
                        json!([])
                    }
                }
                _ => json!(null),
            };
            Ok(serde_json::from_value(v).unwrap())
        }
    }

    fn http_conn() -> ConnectionConf {
        ConnectionConf::Http {
            url: Url::parse("http://localhost:8545").unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batches_pending_hashes() {
        let mock = PendingTxMock {
            polls: Arc::new(AtomicU64::new(0)),
        };
        let provider = Arc::new(Provider::new(mock));
        let (_listener, mut rx) = watch_pending_transactions_polling(
            provider,
            PendingTxWatchParams {
                client: ClientUid::from("batches"),
                connection: http_conn(),
                poll_override: None,
                poll_interval: Duration::from_millis(10),
            },
        );

        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::time::advance(BATCH_WAIT).await;

        match rx.recv().await {
            Some(WatchEvent::Value(batch)) => assert_eq!(batch.len(), 1),
            other => panic!("expected one batch of hashes, got {other:?}"),
        }
    }
}
