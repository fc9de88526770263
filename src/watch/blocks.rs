//! Full-block watch (`spec.md` §4.4.6): re-fetches the full block for every
//! number produced by the block-number watch. A fetch failure for a missed
//! (backfilled) block is dropped silently rather than surfaced as a stream
//! error — the caller already knows it's best-effort.
//!
//! Shares the underlying block-number poller with any other watcher on the
//! same client via [`Observer`], and is itself observer-deduped so two
//! callers watching full blocks on the same client/parameters share one
//! fetch task too.

use std::sync::Arc;

use ethers_providers::Middleware;
use once_cell::sync::Lazy;
use tracing::warn;

use crate::types::{BlockRef, BlockWithTxHashes, WatchEvent};

use super::block_number::{watch_block_number, BlockNumberWatchParams};
use super::observer::{Listener, Observer, ObserverReceiver};
use super::observer_key;

static OBSERVER: Lazy<Observer<WatchEvent<BlockWithTxHashes>>> = Lazy::new(Observer::new);

/// Watch full blocks. `params` is forwarded to [`watch_block_number`]
/// unchanged; this watcher's own observer key is derived from the same
/// client/parameters so it dedups independently of the number watch.
pub fn watch_blocks<M>(
    provider: Arc<M>,
    params: BlockNumberWatchParams,
) -> (
    Listener<WatchEvent<BlockWithTxHashes>>,
    ObserverReceiver<WatchEvent<BlockWithTxHashes>>,
)
where
    M: Middleware + 'static,
{
    let key = observer_key(
        &params.client,
        "blocks",
        &format!("{}:{}", params.poll_interval.as_millis(), params.emit_missed),
    );
    let key_for_emit: Arc<str> = Arc::from(key.as_str());

    OBSERVER.subscribe(key, move || {
        let (number_listener, mut number_rx) = watch_block_number(provider.clone(), params);
        let provider = provider.clone();
        let key_for_emit = key_for_emit.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = number_rx.recv().await {
                match event {
                    WatchEvent::Value(number) => {
                        match provider
                            .get_block(BlockRef::Number(number).to_block_id())
                            .await
                        {
                            Ok(Some(block)) => {
                                OBSERVER.emit(&key_for_emit, WatchEvent::value(block));
                            }
                            Ok(None) => {
                                // reorged out from under us between the number
                                // poll and this fetch; drop silently.
                            }
                            Err(e) => {
                                warn!(error = %e, number, "failed to fetch block for watch, dropping");
                            }
                        }
                    }
                    WatchEvent::Error(e) => {
                        OBSERVER.emit(&key_for_emit, WatchEvent::Error(e));
                    }
                }
            }
        });

        Box::new(move || {
            handle.abort();
            drop(number_listener);
        }) as Box<dyn FnOnce() + Send>
    })
}
