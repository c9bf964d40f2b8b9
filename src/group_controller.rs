//! Per-group capacity controller.
//!
//! One long-lived task per group serializes every scale decision: it merges
//! capacity assertions from the latest-value channel, periodically purges
//! requirements no LB has refreshed, and reconciles the runner pool against
//! the control plane. Producers (`record`) and readers (`members`) touch the
//! shared state through two independent locks that are never nested and
//! never held across a suspension point.

use std::{cmp, sync::Arc};

use tokio::{
    sync::{Mutex, RwLock, watch},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::PoolManagerConfig,
    control_plane::ControlPlane,
    data_model::{GroupId, LbId},
    metrics::PoolMetrics,
    requirements::{CapacityAssertion, RequirementTable},
    runner_pool::RunnerPool,
};

pub(crate) struct GroupController {
    group_id: GroupId,
    control_plane: Arc<dyn ControlPlane>,
    config: Arc<PoolManagerConfig>,
    metrics: Arc<PoolMetrics>,
    requirements: Mutex<RequirementTable>,
    pool: RwLock<RunnerPool>,
    assertion_tx: watch::Sender<CapacityAssertion>,
}

impl GroupController {
    /// Create the controller and start its event loop task.
    pub(crate) fn spawn(
        group_id: GroupId,
        control_plane: Arc<dyn ControlPlane>,
        config: Arc<PoolManagerConfig>,
        metrics: Arc<PoolMetrics>,
        shutdown_rx: watch::Receiver<()>,
    ) -> Arc<Self> {
        let (assertion_tx, assertion_rx) = watch::channel(CapacityAssertion {
            ts: Instant::now(),
            total_wanted: 0,
        });
        let controller = Arc::new(Self {
            group_id,
            control_plane,
            config,
            metrics,
            requirements: Mutex::new(RequirementTable::new()),
            pool: RwLock::new(RunnerPool::new()),
            assertion_tx,
        });
        tokio::spawn(controller.clone().run(assertion_rx, shutdown_rx));
        controller
    }

    /// Record an LB's latest absolute assertion and wake the event loop.
    ///
    /// The assertion lock is released before publishing so a slow controller
    /// never back-pressures producers. The channel is a single-slot
    /// latest-value mailbox; overwriting is safe because assertions are
    /// absolute.
    pub(crate) async fn record(&self, lb_id: LbId, total_bytes: u64) {
        let assertion = {
            let mut requirements = self.requirements.lock().await;
            requirements.record(lb_id, total_bytes, Instant::now())
        };
        if self.assertion_tx.send(assertion).is_err() {
            debug!(
                group_id = %self.group_id,
                "controller stopped, dropping capacity assertion"
            );
        }
    }

    /// Snapshot of the currently active runner addresses, insertion order.
    pub(crate) async fn members(&self) -> Vec<String> {
        self.pool.read().await.member_addresses()
    }

    async fn run(
        self: Arc<Self>,
        mut assertion_rx: watch::Receiver<CapacityAssertion>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        let mut purge_ticker = tokio::time::interval_at(
            Instant::now() + self.config.purge_interval,
            self.config.purge_interval,
        );
        purge_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll_ticker = tokio::time::interval_at(
            Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!(group_id = %self.group_id, "group controller shutting down");
                    break;
                }
                changed = assertion_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let assertion = *assertion_rx.borrow_and_update();
                    self.apply_target(assertion.ts, assertion.total_wanted).await;
                }
                _ = purge_ticker.tick() => {
                    let now = Instant::now();
                    let need = self.purge_stale_requirements(now).await;
                    self.apply_target(now, need).await;
                }
                _ = poll_ticker.tick() => {
                    self.poll_runners().await;
                }
            }
        }
    }

    /// Expire requirements no LB has refreshed within the freshness bound
    /// and return the post-purge total.
    async fn purge_stale_requirements(&self, now: Instant) -> u64 {
        let mut requirements = self.requirements.lock().await;
        let Some(cutoff) = now.checked_sub(self.config.valid_requirement_age) else {
            return requirements.total_wanted();
        };
        let mut purged = 0u64;
        let total_wanted = requirements.purge(cutoff, |lb_id| {
            debug!(
                group_id = %self.group_id,
                lb_id = %lb_id,
                "expiring stale capacity requirement"
            );
            purged += 1;
        });
        drop(requirements);
        if purged > 0 {
            self.metrics.requirements_purged.add(purged, &[]);
            info!(
                group_id = %self.group_id,
                purged,
                total_wanted,
                "purged stale capacity requirements"
            );
        }
        total_wanted
    }

    /// Act on an aggregated assertion: reactivate draining runners, then
    /// provision, or drain down, as the scale policy dictates.
    ///
    /// Scale-up compares against `target_capacity` (outstanding requests are
    /// trusted to materialize) while scale-down compares against
    /// `current_capacity` (only confirmed capacity is drained), with a
    /// hysteresis band of one runner unit.
    pub(crate) async fn apply_target(&self, ts: Instant, wanted: u64) {
        if ts.elapsed() > self.config.valid_requirement_age {
            debug!(
                group_id = %self.group_id,
                age_ms = ts.elapsed().as_millis() as u64,
                "dropping stale capacity assertion"
            );
            self.metrics.stale_assertions_dropped.add(1, &[]);
            return;
        }

        let capacity_per_runner = self.config.capacity_per_runner;
        let mut provision_count = None;
        {
            let mut pool = self.pool.write().await;
            if wanted > pool.target_capacity() {
                let mut reactivated = 0u64;
                while wanted > pool.target_capacity() {
                    let Some(runner_id) = pool.reactivate_one() else {
                        break;
                    };
                    debug!(
                        group_id = %self.group_id,
                        runner_id = %runner_id,
                        "reactivated draining runner"
                    );
                    reactivated += 1;
                }
                if reactivated > 0 {
                    self.metrics.runners_reactivated.add(reactivated, &[]);
                    self.metrics.active_runners.add(reactivated as i64, &[]);
                }
                if wanted > pool.target_capacity() {
                    let shortfall = wanted - pool.target_capacity();
                    let count = cmp::min(
                        shortfall.div_ceil(capacity_per_runner),
                        self.config.largest_request_at_once as u64,
                    );
                    provision_count = Some(count as usize);
                }
            } else if wanted < pool.current_capacity().saturating_sub(capacity_per_runner) {
                let kill_after = Instant::now() + self.config.max_draindown_lifetime;
                let mut drained = 0u64;
                while wanted < pool.current_capacity().saturating_sub(capacity_per_runner) {
                    let Some(runner_id) = pool.drain_one(kill_after) else {
                        break;
                    };
                    debug!(
                        group_id = %self.group_id,
                        runner_id = %runner_id,
                        "draining runner for scale-down"
                    );
                    drained += 1;
                }
                if drained > 0 {
                    self.metrics.runners_drained.add(drained, &[]);
                    self.metrics.active_runners.add(-(drained as i64), &[]);
                    info!(
                        group_id = %self.group_id,
                        drained,
                        wanted,
                        current_capacity = pool.current_capacity(),
                        "scaled down"
                    );
                }
            }
        }

        // The provision call happens with no lock held; only this task
        // mutates the pool, so crediting the grant afterwards is safe.
        if let Some(count) = provision_count {
            self.metrics.runners_requested.add(count as u64, &[]);
            match self.control_plane.provision(&self.group_id, count).await {
                Ok(granted) => {
                    self.metrics.runners_granted.add(granted as u64, &[]);
                    let mut pool = self.pool.write().await;
                    pool.add_pending_capacity(granted as u64 * capacity_per_runner);
                    info!(
                        group_id = %self.group_id,
                        requested = count,
                        granted,
                        wanted,
                        target_capacity = pool.target_capacity(),
                        "scaled up"
                    );
                }
                Err(err) => {
                    error!(
                        group_id = %self.group_id,
                        error = ?err,
                        "failed to provision runners"
                    );
                }
            }
        }
    }

    /// One reconcile pass: expire drained runners, issue or retry teardown
    /// requests for dead runners, then fold the control plane's listing
    /// into the pool. Listing errors leave the pool untouched.
    async fn poll_runners(&self) {
        let now = Instant::now();
        let removals = {
            let mut pool = self.pool.write().await;
            for runner_id in pool.expire_drained(now) {
                info!(
                    group_id = %self.group_id,
                    runner_id = %runner_id,
                    "draining runner reached shutdown deadline"
                );
            }
            pool.pending_removals()
        };

        for runner_id in removals {
            match self.control_plane.remove(&self.group_id, &runner_id).await {
                Ok(()) => {
                    self.metrics.runners_removed.add(1, &[]);
                    self.pool.write().await.mark_removal_sent(&runner_id);
                }
                Err(err) => {
                    error!(
                        group_id = %self.group_id,
                        runner_id = %runner_id,
                        error = ?err,
                        "failed to request runner teardown, will retry on next poll"
                    );
                }
            }
        }

        let observed = match self.control_plane.list(&self.group_id).await {
            Ok(hosts) => hosts,
            Err(err) => {
                error!(
                    group_id = %self.group_id,
                    error = ?err,
                    "failed to list runners"
                );
                return;
            }
        };

        let outcome = self.pool.write().await.reconcile(&observed);
        if !outcome.adopted.is_empty() {
            self.metrics
                .runners_adopted
                .add(outcome.adopted.len() as u64, &[]);
            self.metrics
                .active_runners
                .add(outcome.adopted.len() as i64, &[]);
            for runner_id in &outcome.adopted {
                info!(
                    group_id = %self.group_id,
                    runner_id = %runner_id,
                    "adopted runner from control plane listing"
                );
            }
        }
        for runner_id in &outcome.reaped {
            debug!(
                group_id = %self.group_id,
                runner_id = %runner_id,
                "dead runner no longer listed, forgetting it"
            );
        }
        for runner_id in &outcome.missing {
            warn!(
                group_id = %self.group_id,
                runner_id = %runner_id,
                "runner missing from control plane listing, keeping it"
            );
        }
    }

    #[cfg(test)]
    pub(crate) async fn total_wanted(&self) -> u64 {
        self.requirements.lock().await.total_wanted()
    }

    #[cfg(test)]
    pub(crate) async fn current_capacity(&self) -> u64 {
        self.pool.read().await.current_capacity()
    }

    #[cfg(test)]
    pub(crate) async fn target_capacity(&self) -> u64 {
        self.pool.read().await.target_capacity()
    }
}
