//! Per-group bookkeeping of what each load balancer last asked for.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::data_model::LbId;

/// An aggregated capacity assertion handed to the group controller:
/// the group-wide total at the moment `ts` was recorded. Totals are absolute
/// values, so only the latest assertion matters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CapacityAssertion {
    pub ts: Instant,
    pub total_wanted: u64,
}

#[derive(Debug)]
struct Requirement {
    ts: Instant,
    total_wanted: u64,
}

/// Latest requirement per load balancer plus the running group total.
///
/// Absolute-value assertions make the protocol idempotent and self-healing
/// under lost messages: an LB that stops talking has its contribution decay
/// out via [`purge`](RequirementTable::purge).
#[derive(Debug, Default)]
pub(crate) struct RequirementTable {
    requirements: HashMap<LbId, Requirement>,
    total_wanted: u64,
}

impl RequirementTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record an LB's latest absolute assertion, replacing any prior one, and
    /// return the updated group-wide assertion.
    pub(crate) fn record(&mut self, lb_id: LbId, total: u64, now: Instant) -> CapacityAssertion {
        let entry = self.requirements.entry(lb_id).or_insert(Requirement {
            ts: now,
            total_wanted: 0,
        });

        self.total_wanted -= entry.total_wanted;
        self.total_wanted += total;

        entry.ts = now;
        entry.total_wanted = total;

        CapacityAssertion {
            ts: now,
            total_wanted: self.total_wanted,
        }
    }

    /// Drop every requirement recorded strictly before `oldest_acceptable`,
    /// invoking `on_expired` per removed LB. Returns the post-purge total.
    pub(crate) fn purge(
        &mut self,
        oldest_acceptable: Instant,
        mut on_expired: impl FnMut(&LbId),
    ) -> u64 {
        let total_wanted = &mut self.total_wanted;
        self.requirements.retain(|lb_id, requirement| {
            if requirement.ts < oldest_acceptable {
                *total_wanted -= requirement.total_wanted;
                on_expired(lb_id);
                false
            } else {
                true
            }
        });
        *total_wanted
    }

    pub(crate) fn total_wanted(&self) -> u64 {
        self.total_wanted
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.requirements.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn record_sums_across_lbs() {
        let mut table = RequirementTable::new();
        let now = Instant::now();

        let assertion = table.record("lb1".into(), 600, now);
        assert_eq!(600, assertion.total_wanted);

        let assertion = table.record("lb2".into(), 900, now);
        assert_eq!(1500, assertion.total_wanted);
        assert_eq!(1500, table.total_wanted());
        assert_eq!(2, table.len());
    }

    #[tokio::test]
    async fn record_replaces_prior_assertion_from_same_lb() {
        let mut table = RequirementTable::new();
        let now = Instant::now();

        table.record("lb1".into(), 600, now);
        table.record("lb1".into(), 200, now);

        assert_eq!(200, table.total_wanted());
        assert_eq!(1, table.len());
    }

    #[tokio::test]
    async fn repeated_identical_batch_leaves_total_unchanged() {
        let mut table = RequirementTable::new();
        let now = Instant::now();

        table.record("lb1".into(), 600, now);
        table.record("lb2".into(), 900, now);
        let before = table.total_wanted();

        table.record("lb1".into(), 600, now);
        table.record("lb2".into(), 900, now);

        assert_eq!(before, table.total_wanted());
    }

    #[tokio::test]
    async fn purge_drops_only_entries_strictly_older_than_cutoff() {
        let mut table = RequirementTable::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);

        table.record("stale".into(), 900, t0);
        table.record("fresh".into(), 600, t1);

        let mut expired = Vec::new();
        let total = table.purge(t1, |lb_id| expired.push(lb_id.clone()));

        assert_eq!(600, total);
        assert_eq!(vec![LbId::from("stale")], expired);
        assert_eq!(1, table.len());

        // An entry recorded exactly at the cutoff survives.
        let total = table.purge(t1, |_| panic!("nothing should expire"));
        assert_eq!(600, total);
    }
}
