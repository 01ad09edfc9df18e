//! Constant variables.

/// Bits of the identifier space.
pub const NBIT: usize = 160;
/// Default replication factor, the length of successor lists.
pub const NSUCC: usize = 16;
/// Vnodes per host accepted by identity checks.
pub const MAX_VNODES: u32 = 1024;
/// Location cache capacity: one entry per finger plus three neighbour windows.
pub const DEFAULT_MAX_CACHE: usize = NBIT + 3 * NSUCC;
/// Hard limit on the length of an iterative lookup path.
pub const MAX_PATH_LEN: usize = 1000;
/// Failed alternates a recursive hop tries before reporting failure.
pub const RECROUTE_MAX_FAILED: usize = 3;
/// Retries of one lookup before giving up.
pub const MAX_RETRIES: usize = 5;

/// default rpc timeout in ms
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 3000;
/// default recursive lookup ttl in ms
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 60 * 1000;

/// First re-check of a dead node, in ms.
pub const CHECK_DEAD_INITIAL_MS: u64 = 60 * 1000;
/// Ceiling of the dead-node re-check period, in ms. Past this the record is evicted.
pub const CHECK_DEAD_MAX_MS: u64 = 3600 * 1000;

pub const STABILIZE_TIMER_MS: u64 = 1000;
pub const STABILIZE_CONTINUOUS_MAX_MS: u64 = 10 * 1000;
/// 500s
pub const STABILIZE_TIMER_MAX_MS: u64 = 500 * 1000;
pub const STABILIZE_DECREASE_TIMER_MS: u64 = 1000;
pub const STABILIZE_SLOWDOWN_FACTOR: f64 = 1.2;

/// Accordion bandwidth budget, in bytes per second.
pub const ACCORDION_BUDGET: u64 = 10;
/// Accordion burst ceiling as a multiple of the budget.
pub const ACCORDION_BURST_FACTOR: u64 = 100;
/// Bytes charged per forwarded lookup message.
pub const ACCORDION_MSG_BYTES: u64 = 40;
pub const ACCORDION_MAX_PARALLELISM: usize = 6;
/// Lifetime of an entry in the seen-route table, in ms.
pub const ACCORDION_SENT_TTL_MS: u64 = 20 * 1000;
/// Period of the seen-route sweep, in ms.
pub const ACCORDION_CLEAN_INTERVAL_MS: u64 = 60 * 1000;
/// Nodes returned to fill the gap between a hop and the key
pub const ACCORDION_FILL_GAP_NODES: usize = 5;
