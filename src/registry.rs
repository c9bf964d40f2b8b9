//! Group registry: group id → controller, created lazily.
//!
//! The registry is append-only at runtime. Controllers are never torn down;
//! on shutdown every controller loop exits via the shared shutdown channel
//! and the map is abandoned with the process.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{RwLock, watch};
use tracing::info;

use crate::{
    config::PoolManagerConfig,
    control_plane::ControlPlane,
    data_model::GroupId,
    group_controller::GroupController,
    metrics::PoolMetrics,
};

pub(crate) struct GroupRegistry {
    control_plane: Arc<dyn ControlPlane>,
    config: Arc<PoolManagerConfig>,
    metrics: Arc<PoolMetrics>,
    shutdown_rx: watch::Receiver<()>,
    groups: RwLock<HashMap<GroupId, Arc<GroupController>>>,
}

impl GroupRegistry {
    pub(crate) fn new(
        control_plane: Arc<dyn ControlPlane>,
        config: Arc<PoolManagerConfig>,
        metrics: Arc<PoolMetrics>,
        shutdown_rx: watch::Receiver<()>,
    ) -> Self {
        Self {
            control_plane,
            config,
            metrics,
            shutdown_rx,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Return the group's controller, creating it (and starting its event
    /// loop) on first access.
    pub(crate) async fn group(&self, group_id: &GroupId) -> Arc<GroupController> {
        // Optimistic path.
        if let Some(controller) = self.groups.read().await.get(group_id) {
            return controller.clone();
        }

        // Upgrade to an exclusive lock and check again.
        let mut groups = self.groups.write().await;
        if let Some(controller) = groups.get(group_id) {
            return controller.clone();
        }
        info!(group_id = %group_id, "creating controller for new group");
        let controller = GroupController::spawn(
            group_id.clone(),
            self.control_plane.clone(),
            self.config.clone(),
            self.metrics.clone(),
            self.shutdown_rx.clone(),
        );
        groups.insert(group_id.clone(), controller.clone());
        controller
    }

    /// Read-only lookup that never creates a controller.
    pub(crate) async fn get(&self, group_id: &GroupId) -> Option<Arc<GroupController>> {
        self.groups.read().await.get(group_id).cloned()
    }

    #[cfg(test)]
    pub(crate) async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}
