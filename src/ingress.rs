//! Snapshot ingress: routes per-group capacity assertions from a load
//! balancer batch to the right group controllers.

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::debug;

use crate::{
    data_model::{CapacitySnapshot, LbId, mem_mb_to_bytes},
    registry::GroupRegistry,
};

pub(crate) struct SnapshotIngress {
    registry: Arc<GroupRegistry>,
}

impl SnapshotIngress {
    pub(crate) fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }

    /// Route one batch of absolute capacity assertions.
    ///
    /// The whole batch is schema-checked before anything is routed, so a
    /// malformed batch never reaches a controller. Duplicate delivery of the
    /// same batch merely rewrites each requirement with the same values and
    /// a fresh timestamp.
    pub(crate) async fn handle_batch(
        &self,
        lb_id: &LbId,
        snapshots: &[CapacitySnapshot],
    ) -> Result<()> {
        if lb_id.get().is_empty() {
            bail!("lb id must not be empty");
        }
        for snapshot in snapshots {
            if snapshot.group_id.get().is_empty() {
                bail!("group id must not be empty");
            }
        }

        for snapshot in snapshots {
            let controller = self.registry.group(&snapshot.group_id).await;
            controller
                .record(lb_id.clone(), mem_mb_to_bytes(snapshot.mem_mb))
                .await;
        }
        debug!(
            lb_id = %lb_id,
            snapshots = snapshots.len(),
            "merged capacity snapshot batch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;
    use crate::{
        config::PoolManagerConfig,
        data_model::GroupId,
        metrics::PoolMetrics,
        testing::FakeControlPlane,
    };

    fn ingress() -> SnapshotIngress {
        let config = Arc::new(PoolManagerConfig::default());
        let control_plane = Arc::new(FakeControlPlane::new(config.capacity_per_runner));
        let metrics = Arc::new(PoolMetrics::new(&opentelemetry::global::meter(
            "runner_pool_test",
        )));
        let (_shutdown_tx, shutdown_rx) = watch::channel(());
        SnapshotIngress::new(Arc::new(GroupRegistry::new(
            control_plane,
            config,
            metrics,
            shutdown_rx,
        )))
    }

    fn snapshot(group: &str, mem_mb: u64) -> CapacitySnapshot {
        CapacitySnapshot {
            group_id: GroupId::from(group),
            mem_mb,
        }
    }

    #[tokio::test]
    async fn routes_entries_and_creates_groups_on_demand() {
        let ingress = ingress();

        ingress
            .handle_batch(&"lb1".into(), &[snapshot("g1", 600), snapshot("g2", 900)])
            .await
            .unwrap();

        assert_eq!(2, ingress.registry.group_count().await);
        let g1 = ingress.registry.get(&GroupId::from("g1")).await.unwrap();
        assert_eq!(mem_mb_to_bytes(600), g1.total_wanted().await);
    }

    #[tokio::test]
    async fn rejects_empty_lb_id_before_routing() {
        let ingress = ingress();

        let result = ingress.handle_batch(&"".into(), &[snapshot("g1", 600)]).await;

        assert!(result.is_err());
        assert_eq!(0, ingress.registry.group_count().await);
    }

    #[tokio::test]
    async fn rejects_batch_with_empty_group_id_atomically() {
        let ingress = ingress();

        let result = ingress
            .handle_batch(&"lb1".into(), &[snapshot("g1", 600), snapshot("", 900)])
            .await;

        assert!(result.is_err());
        // Nothing from the batch was routed, not even the valid entry.
        assert_eq!(0, ingress.registry.group_count().await);
    }

    #[tokio::test]
    async fn duplicate_batches_leave_totals_unchanged() {
        let ingress = ingress();
        let batch = [snapshot("g1", 600), snapshot("g1", 600)];

        ingress.handle_batch(&"lb1".into(), &batch).await.unwrap();
        ingress.handle_batch(&"lb1".into(), &batch).await.unwrap();

        let g1 = ingress.registry.get(&GroupId::from("g1")).await.unwrap();
        assert_eq!(mem_mb_to_bytes(600), g1.total_wanted().await);
    }
}
