//! The watch subsystem (`spec.md` §4.4): transport-mode selection, observer
//! fan-out, and the concrete watch kinds (block number, full blocks, event
//! logs, pending transactions).

pub mod batch;
pub mod block_number;
pub mod blocks;
pub mod events;
pub mod observer;
pub mod pending_tx;

use crate::config::{ClientConfig, ConnectionConf};
use crate::types::ClientUid;

/// Whether a watch should poll or subscribe, resolved per `spec.md` §4.4.1:
/// an explicit `poll` override wins; otherwise a subscription-capable
/// transport subscribes and an HTTP-only transport polls; a `from_block`
/// request always forces polling regardless of transport, since replaying
/// history requires `getLogs`/backfill that a subscription can't provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Poll,
    Subscribe,
}

pub fn resolve_transport_mode(
    connection: &ConnectionConf,
    explicit_poll: Option<bool>,
    from_block: Option<u64>,
) -> TransportMode {
    if from_block.is_some() {
        return TransportMode::Poll;
    }
    if let Some(poll) = explicit_poll {
        return if poll {
            TransportMode::Poll
        } else {
            TransportMode::Subscribe
        };
    }
    if connection.supports_subscription() {
        TransportMode::Subscribe
    } else {
        TransportMode::Poll
    }
}

/// Build the observer key a watch registers itself under (`spec.md`
/// §4.4.2): client + watch kind + the kind's own discriminating parameters,
/// so two callers watching the same thing on the same client share one
/// upstream source.
pub fn observer_key(client: &ClientUid, kind: &str, discriminator: &str) -> String {
    format!("{client}:{kind}:{discriminator}")
}

/// Resolve the effective poll interval: caller override, else client
/// default, else the crate-wide default.
pub fn effective_poll_interval(
    caller_override: Option<std::time::Duration>,
    config: &ClientConfig,
) -> std::time::Duration {
    caller_override
        .or(config.polling_interval)
        .unwrap_or(crate::config::DEFAULT_POLLING_INTERVAL)
}
