//! Metrics for capacity pool operations.

use opentelemetry::metrics::{Counter, Meter, UpDownCounter};

/// Counters describing scale and reconcile activity across all groups.
#[derive(Clone)]
pub struct PoolMetrics {
    /// Runners requested from the control plane.
    pub runners_requested: Counter<u64>,
    /// Runners the control plane admitted.
    pub runners_granted: Counter<u64>,
    /// Draining runners promoted back to active.
    pub runners_reactivated: Counter<u64>,
    /// Active runners moved into the draining pool.
    pub runners_drained: Counter<u64>,
    /// Teardown requests the control plane accepted.
    pub runners_removed: Counter<u64>,
    /// Runners adopted from the control plane listing.
    pub runners_adopted: Counter<u64>,
    /// Requirements expired by the purge sweep.
    pub requirements_purged: Counter<u64>,
    /// Capacity assertions dropped by the freshness gate.
    pub stale_assertions_dropped: Counter<u64>,
    /// Currently active runners across all groups.
    pub active_runners: UpDownCounter<i64>,
}

impl PoolMetrics {
    pub fn new(meter: &Meter) -> Self {
        let runners_requested = meter
            .u64_counter("runner_pool_runners_requested_total")
            .with_description("Total runners requested from the control plane")
            .build();

        let runners_granted = meter
            .u64_counter("runner_pool_runners_granted_total")
            .with_description("Total runners the control plane admitted")
            .build();

        let runners_reactivated = meter
            .u64_counter("runner_pool_runners_reactivated_total")
            .with_description("Total draining runners promoted back to active")
            .build();

        let runners_drained = meter
            .u64_counter("runner_pool_runners_drained_total")
            .with_description("Total active runners moved to draining")
            .build();

        let runners_removed = meter
            .u64_counter("runner_pool_runners_removed_total")
            .with_description("Total teardown requests accepted by the control plane")
            .build();

        let runners_adopted = meter
            .u64_counter("runner_pool_runners_adopted_total")
            .with_description("Total runners adopted from the control plane listing")
            .build();

        let requirements_purged = meter
            .u64_counter("runner_pool_requirements_purged_total")
            .with_description("Total requirements expired by the purge sweep")
            .build();

        let stale_assertions_dropped = meter
            .u64_counter("runner_pool_stale_assertions_dropped_total")
            .with_description("Total capacity assertions dropped as stale")
            .build();

        let active_runners = meter
            .i64_up_down_counter("runner_pool_active_runners")
            .with_description("Currently active runners across all groups")
            .build();

        Self {
            runners_requested,
            runners_granted,
            runners_reactivated,
            runners_drained,
            runners_removed,
            runners_adopted,
            requirements_purged,
            stale_assertions_dropped,
            active_runners,
        }
    }
}
