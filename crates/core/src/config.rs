//! Configuration of a [Vnode](crate::vnode::Vnode).
//! Every field has a serde default, so a partial document deserializes.
#![warn(missing_docs)]
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::consts::*;

/// How lookups walk the ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStrategy {
    /// The origin contacts every hop itself.
    #[default]
    Iterative,
    /// Every hop forwards the query, the last one answers the origin.
    Recursive,
    /// Recursive with budget-bounded parallel forwarding.
    Accordion,
}

/// Which routing table backs `closest_predecessor`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerStrategy {
    /// Fingers are the closest successors of `self + 2^i`.
    #[default]
    Basic,
    /// Proximity neighbor selection on top of the basic fingers.
    Pns,
}

/// Bounds of a stabilization timer in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Starting value and lower bound.
    pub init_ms: u64,
    /// Baseline the timer is pulled toward while the ring changes.
    pub base_ms: u64,
    /// Upper bound.
    pub max_ms: u64,
}

impl TimerConfig {
    fn continuous() -> Self {
        Self {
            init_ms: STABILIZE_TIMER_MS,
            base_ms: STABILIZE_TIMER_MS,
            max_ms: STABILIZE_CONTINUOUS_MAX_MS,
        }
    }

    fn backoff() -> Self {
        Self {
            init_ms: STABILIZE_TIMER_MS,
            base_ms: STABILIZE_TIMER_MS,
            max_ms: STABILIZE_TIMER_MAX_MS,
        }
    }
}

/// Token bucket of the parallel router.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccordionConfig {
    /// Bytes per second the node may spend on parallel lookups.
    #[serde(default = "default_budget")]
    pub budget: u64,
    /// Bucket capacity in bytes.
    #[serde(default = "default_burst")]
    pub burst: u64,
}

impl Default for AccordionConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            burst: default_burst(),
        }
    }
}

/// Tunables of a ring member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VnodeConfig {
    /// Replication factor, the size of the successor list.
    #[serde(default = "default_nsucc")]
    pub nsucc: usize,
    /// Capacity of the location cache.
    #[serde(default = "default_max_cache")]
    pub max_cache: usize,
    /// Hops after which a lookup gives up.
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,
    /// Timeout of a single RPC.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Ceiling of an outstanding recursive lookup.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// Lookup protocol.
    #[serde(default)]
    pub route_strategy: RouteStrategy,
    /// Routing table.
    #[serde(default)]
    pub finger_strategy: FingerStrategy,
    /// Require ids to be derived from the peer's address.
    #[serde(default = "default_true")]
    pub verify_ids: bool,
    /// Let the penultimate hop answer recursive lookups.
    #[serde(default)]
    pub shave: bool,
    /// Bounds of the continuous timer.
    #[serde(default = "TimerConfig::continuous")]
    pub continuous: TimerConfig,
    /// Bounds of the backoff timer.
    #[serde(default = "TimerConfig::backoff")]
    pub backoff: TimerConfig,
    /// Additive speed up step of both timers.
    #[serde(default = "default_decrease_step_ms")]
    pub decrease_step_ms: u64,
    /// Slow down factor of the backoff timer while stable.
    #[serde(default = "default_slowdown_factor")]
    pub slowdown_factor: f64,
    /// First re-check of a dead node.
    #[serde(default = "default_check_dead_initial_ms")]
    pub check_dead_initial_ms: u64,
    /// Ceiling of the dead node re-check period.
    #[serde(default = "default_check_dead_max_ms")]
    pub check_dead_max_ms: u64,
    /// Parallel router budget.
    #[serde(default)]
    pub accordion: AccordionConfig,
}

impl Default for VnodeConfig {
    fn default() -> Self {
        Self {
            nsucc: default_nsucc(),
            max_cache: default_max_cache(),
            max_path_len: default_max_path_len(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            route_strategy: RouteStrategy::default(),
            finger_strategy: FingerStrategy::default(),
            verify_ids: true,
            shave: false,
            continuous: TimerConfig::continuous(),
            backoff: TimerConfig::backoff(),
            decrease_step_ms: default_decrease_step_ms(),
            slowdown_factor: default_slowdown_factor(),
            check_dead_initial_ms: default_check_dead_initial_ms(),
            check_dead_max_ms: default_check_dead_max_ms(),
            accordion: AccordionConfig::default(),
        }
    }
}

impl VnodeConfig {
    /// Timeout of a single RPC.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Ceiling of an outstanding recursive lookup.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

fn default_nsucc() -> usize {
    NSUCC
}

fn default_max_cache() -> usize {
    DEFAULT_MAX_CACHE
}

fn default_max_path_len() -> usize {
    MAX_PATH_LEN
}

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_decrease_step_ms() -> u64 {
    STABILIZE_DECREASE_TIMER_MS
}

fn default_slowdown_factor() -> f64 {
    STABILIZE_SLOWDOWN_FACTOR
}

fn default_check_dead_initial_ms() -> u64 {
    CHECK_DEAD_INITIAL_MS
}

fn default_check_dead_max_ms() -> u64 {
    CHECK_DEAD_MAX_MS
}

fn default_budget() -> u64 {
    ACCORDION_BUDGET
}

fn default_burst() -> u64 {
    ACCORDION_BUDGET * ACCORDION_BURST_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: VnodeConfig =
            serde_json::from_str(r#"{"nsucc": 4, "route_strategy": "accordion"}"#).unwrap();
        assert_eq!(cfg.nsucc, 4);
        assert_eq!(cfg.route_strategy, RouteStrategy::Accordion);
        assert_eq!(cfg.max_cache, NBIT + 3 * NSUCC);
        assert_eq!(cfg.backoff.max_ms, 500_000);
        assert_eq!(cfg.accordion.burst, 1000);
        assert!(cfg.verify_ids);
        assert!(!cfg.shave);
    }

    #[test]
    fn test_config_dump_and_load() {
        let cfg = VnodeConfig {
            finger_strategy: FingerStrategy::Pns,
            shave: true,
            ..Default::default()
        };
        let s = serde_json::to_string(&cfg).unwrap();
        assert!(s.contains(r#""finger_strategy":"pns""#));
        let back: VnodeConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back, cfg);
    }
}
