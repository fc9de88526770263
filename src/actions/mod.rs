//! One-shot action shims (`spec.md` §1, §4.6): typed, thin wrappers over a
//! single JSON-RPC round trip, plus the few that carry their own small state
//! machine (`get_block_number`'s cache, `estimate_fees_per_gas`'s exact
//! arithmetic).

pub mod accessors;
pub mod block;
pub mod fees;
pub mod filters;
pub mod logs;
pub mod receipt;
pub mod transaction;

pub use accessors::{
    create_access_list, estimate_gas, get_balance, get_chain_id, get_code, get_gas_price,
    get_max_priority_fee_per_gas, get_proof, get_storage_at, get_transaction_count,
};
pub use block::{get_block, get_block_number, get_block_with_transactions};
pub use fees::{estimate_fees_per_gas, FeeMultiplier, FeesPerGas};
pub use filters::{
    create_block_filter, create_event_filter, create_pending_transaction_filter,
    get_block_filter_changes, get_event_filter_changes, get_filter_logs,
    get_pending_transaction_filter_changes, uninstall_filter,
};
pub use logs::get_logs;
pub use receipt::{get_transaction_confirmations, get_transaction_receipt};
pub use transaction::{get_transaction, get_transaction_by_block_and_index};
