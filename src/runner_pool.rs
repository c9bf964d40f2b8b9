//! Runner-set bookkeeping for one group.
//!
//! The pool holds three disjoint collections. `active` and `draining` are
//! used LIFO: a runner drained last is reactivated first (it is likeliest to
//! still be healthy and warm), and a runner added last is drained first
//! (older runners are more seasoned). `draining` expires FIFO since entries
//! are appended in `kill_after` order. `dead` holds runners awaiting
//! control-plane teardown; they leave once a listing no longer includes them.

use std::collections::HashSet;

use tokio::time::Instant;

use crate::{
    control_plane::RunnerHost,
    data_model::{Runner, RunnerId, RunnerStatus},
};

/// What a reconcile against the control plane listing changed.
#[derive(Debug, Default)]
pub(crate) struct ReconcileOutcome {
    /// Hosts newly adopted into the active pool.
    pub adopted: Vec<RunnerId>,
    /// Dead runners no longer present in the listing, now forgotten.
    pub reaped: Vec<RunnerId>,
    /// Active or draining runners absent from the listing. They are kept;
    /// the control plane is expected not to lose runners silently.
    pub missing: Vec<RunnerId>,
}

#[derive(Debug, Default)]
pub(crate) struct RunnerPool {
    /// Capacity of all active runners.
    current_capacity: u64,
    /// Active capacity plus capacity already requested from the control
    /// plane but not yet observed in a listing.
    target_capacity: u64,
    active: Vec<Runner>,
    draining: Vec<Runner>,
    dead: Vec<Runner>,
    known: HashSet<RunnerId>,
}

impl RunnerPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn current_capacity(&self) -> u64 {
        self.current_capacity
    }

    pub(crate) fn target_capacity(&self) -> u64 {
        self.target_capacity
    }

    /// Credit capacity that the control plane has promised but not yet
    /// materialized in a listing.
    pub(crate) fn add_pending_capacity(&mut self, bytes: u64) {
        self.target_capacity += bytes;
    }

    /// Promote the most recently drained runner back to active.
    pub(crate) fn reactivate_one(&mut self) -> Option<RunnerId> {
        let mut runner = self.draining.pop()?;
        runner.status = RunnerStatus::Active;
        runner.kill_after = None;
        self.current_capacity += runner.capacity;
        self.target_capacity += runner.capacity;
        let runner_id = runner.id.clone();
        self.active.push(runner);
        Some(runner_id)
    }

    /// Move the most recently added active runner into the draining pool.
    pub(crate) fn drain_one(&mut self, kill_after: Instant) -> Option<RunnerId> {
        let mut runner = self.active.pop()?;
        runner.status = RunnerStatus::Draining;
        runner.kill_after = Some(kill_after);
        self.current_capacity -= runner.capacity;
        self.target_capacity -= runner.capacity;
        let runner_id = runner.id.clone();
        self.draining.push(runner);
        Some(runner_id)
    }

    /// Move draining runners whose `kill_after` has elapsed into `dead`.
    /// The oldest draining runner sits at the front.
    pub(crate) fn expire_drained(&mut self, now: Instant) -> Vec<RunnerId> {
        let mut expired = Vec::new();
        while self
            .draining
            .first()
            .is_some_and(|runner| runner.kill_after.is_some_and(|kill_after| kill_after < now))
        {
            let mut runner = self.draining.remove(0);
            runner.status = RunnerStatus::Dead;
            runner.removal_sent = false;
            expired.push(runner.id.clone());
            self.dead.push(runner);
        }
        expired
    }

    /// Dead runners whose teardown request the control plane has not yet
    /// accepted.
    pub(crate) fn pending_removals(&self) -> Vec<RunnerId> {
        self.dead
            .iter()
            .filter(|runner| !runner.removal_sent)
            .map(|runner| runner.id.clone())
            .collect()
    }

    pub(crate) fn mark_removal_sent(&mut self, runner_id: &RunnerId) {
        if let Some(runner) = self.dead.iter_mut().find(|runner| runner.id == *runner_id) {
            runner.removal_sent = true;
        }
    }

    /// Fold the control plane's authoritative listing into the pool.
    ///
    /// Unknown hosts join `active` and raise `current_capacity` only: the
    /// scale-up that requested them already budgeted `target_capacity`.
    /// Dead runners are retained while the listing still includes them and
    /// forgotten once it no longer does.
    pub(crate) fn reconcile(&mut self, observed: &[RunnerHost]) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let observed_ids: HashSet<&RunnerId> = observed.iter().map(|host| &host.id).collect();

        for host in observed {
            if self.known.insert(host.id.clone()) {
                self.active.push(Runner {
                    id: host.id.clone(),
                    address: host.address.clone(),
                    status: RunnerStatus::Active,
                    capacity: host.capacity,
                    kill_after: None,
                    removal_sent: false,
                });
                self.current_capacity += host.capacity;
                outcome.adopted.push(host.id.clone());
            }
        }
        // A host we never asked for carries no budgeted capacity.
        self.target_capacity = self.target_capacity.max(self.current_capacity);

        let known = &mut self.known;
        let reaped = &mut outcome.reaped;
        self.dead.retain(|runner| {
            if observed_ids.contains(&runner.id) {
                true
            } else {
                known.remove(&runner.id);
                reaped.push(runner.id.clone());
                false
            }
        });

        for runner in self.active.iter().chain(self.draining.iter()) {
            if !observed_ids.contains(&runner.id) {
                outcome.missing.push(runner.id.clone());
            }
        }

        outcome
    }

    /// Addresses of the active runners, in insertion order.
    pub(crate) fn member_addresses(&self) -> Vec<String> {
        self.active
            .iter()
            .map(|runner| runner.address.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub(crate) fn draining_count(&self) -> usize {
        self.draining.len()
    }

    #[cfg(test)]
    pub(crate) fn dead_count(&self) -> usize {
        self.dead.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const CAPACITY: u64 = 512 * 1024 * 1024;

    fn host(n: usize) -> RunnerHost {
        RunnerHost {
            id: RunnerId::from(format!("r-{n}").as_str()),
            address: format!("10.0.0.{n}:8191"),
            capacity: CAPACITY,
        }
    }

    fn pool_with_active(count: usize) -> RunnerPool {
        let mut pool = RunnerPool::new();
        pool.add_pending_capacity(count as u64 * CAPACITY);
        let hosts: Vec<RunnerHost> = (0..count).map(host).collect();
        pool.reconcile(&hosts);
        pool
    }

    fn assert_invariants(pool: &RunnerPool) {
        let active_capacity: u64 = pool.active.iter().map(|r| r.capacity).sum();
        assert_eq!(active_capacity, pool.current_capacity);
        assert!(pool.target_capacity >= pool.current_capacity);

        let mut ids = HashSet::new();
        for runner in pool
            .active
            .iter()
            .chain(pool.draining.iter())
            .chain(pool.dead.iter())
        {
            assert!(ids.insert(runner.id.clone()), "duplicate id {}", runner.id);
            assert!(pool.known.contains(&runner.id));
        }
        assert_eq!(ids.len(), pool.known.len());

        for pair in pool.draining.windows(2) {
            assert!(pair[0].kill_after <= pair[1].kill_after);
        }
    }

    #[tokio::test]
    async fn reconcile_adopts_only_unknown_hosts() {
        let mut pool = RunnerPool::new();
        pool.add_pending_capacity(2 * CAPACITY);

        let outcome = pool.reconcile(&[host(0), host(1)]);
        assert_eq!(2, outcome.adopted.len());
        assert_eq!(2 * CAPACITY, pool.current_capacity());
        assert_eq!(2 * CAPACITY, pool.target_capacity());

        // The same listing again is a no-op.
        let outcome = pool.reconcile(&[host(0), host(1)]);
        assert!(outcome.adopted.is_empty());
        assert_eq!(2 * CAPACITY, pool.current_capacity());
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn reconcile_covers_unsolicited_hosts_in_target() {
        let mut pool = RunnerPool::new();

        pool.reconcile(&[host(0)]);

        assert_eq!(CAPACITY, pool.current_capacity());
        assert_eq!(CAPACITY, pool.target_capacity());
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn drain_pops_most_recently_added_active_runner() {
        let mut pool = pool_with_active(3);
        let kill_after = Instant::now() + Duration::from_secs(120);

        let drained = pool.drain_one(kill_after).unwrap();

        assert_eq!(RunnerId::from("r-2"), drained);
        assert_eq!(2, pool.active_count());
        assert_eq!(1, pool.draining_count());
        assert_eq!(2 * CAPACITY, pool.current_capacity());
        assert_eq!(2 * CAPACITY, pool.target_capacity());
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn reactivate_pops_most_recently_drained_runner() {
        let mut pool = pool_with_active(3);
        let now = Instant::now();
        pool.drain_one(now + Duration::from_secs(100));
        pool.drain_one(now + Duration::from_secs(200));

        let reactivated = pool.reactivate_one().unwrap();

        // r-1 was drained last, so it comes back first.
        assert_eq!(RunnerId::from("r-1"), reactivated);
        assert_eq!(2, pool.active_count());
        assert_eq!(1, pool.draining_count());
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn expire_pops_oldest_drained_runners_first() {
        let mut pool = pool_with_active(3);
        let now = Instant::now();
        pool.drain_one(now + Duration::from_secs(100));
        pool.drain_one(now + Duration::from_secs(200));

        let expired = pool.expire_drained(now + Duration::from_secs(150));

        assert_eq!(vec![RunnerId::from("r-2")], expired);
        assert_eq!(1, pool.draining_count());
        assert_eq!(1, pool.dead_count());
        assert_eq!(vec![RunnerId::from("r-2")], pool.pending_removals());
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn expire_leaves_unexpired_runners_alone() {
        let mut pool = pool_with_active(1);
        let now = Instant::now();
        pool.drain_one(now + Duration::from_secs(100));

        let expired = pool.expire_drained(now + Duration::from_secs(100));

        // The deadline has to be strictly in the past.
        assert!(expired.is_empty());
        assert_eq!(1, pool.draining_count());
    }

    #[tokio::test]
    async fn reconcile_retains_dead_runner_still_listed() {
        let mut pool = pool_with_active(2);
        let now = Instant::now();
        pool.drain_one(now);
        pool.expire_drained(now + Duration::from_secs(200));
        assert_eq!(1, pool.dead_count());

        // The control plane still lists r-1: teardown has not landed yet.
        let outcome = pool.reconcile(&[host(0), host(1)]);

        assert!(outcome.reaped.is_empty());
        assert_eq!(1, pool.dead_count());
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn reconcile_drops_dead_runner_once_gone() {
        let mut pool = pool_with_active(2);
        let now = Instant::now();
        pool.drain_one(now);
        pool.expire_drained(now + Duration::from_secs(200));

        let outcome = pool.reconcile(&[host(0)]);

        assert_eq!(vec![RunnerId::from("r-1")], outcome.reaped);
        assert_eq!(0, pool.dead_count());
        assert!(!pool.known.contains(&RunnerId::from("r-1")));
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn reconcile_keeps_unlisted_active_runner() {
        let mut pool = pool_with_active(2);

        let outcome = pool.reconcile(&[host(0)]);

        assert_eq!(vec![RunnerId::from("r-1")], outcome.missing);
        assert_eq!(2, pool.active_count());
        assert_eq!(2 * CAPACITY, pool.current_capacity());
        assert_invariants(&pool);
    }

    #[tokio::test]
    async fn mark_removal_sent_stops_retries() {
        let mut pool = pool_with_active(1);
        let now = Instant::now();
        pool.drain_one(now);
        pool.expire_drained(now + Duration::from_secs(200));
        assert_eq!(1, pool.pending_removals().len());

        pool.mark_removal_sent(&RunnerId::from("r-0"));

        assert!(pool.pending_removals().is_empty());
    }
}
