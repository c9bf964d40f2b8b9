//! Test doubles for the control plane seam.

#[cfg(test)]
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    control_plane::{ControlPlane, RunnerHost},
    data_model::{GroupId, RunnerId},
};

#[derive(Default)]
struct FakeState {
    next_runner: u64,
    hosts: std::collections::HashMap<GroupId, Vec<RunnerHost>>,
    provision_calls: Vec<(GroupId, usize)>,
    remove_calls: Vec<(GroupId, RunnerId)>,
    admission_limit: Option<usize>,
    fail_provision: bool,
    fail_list: bool,
    fail_remove: bool,
}

/// In-memory control plane.
///
/// Provisioned runners join the inventory immediately and are observed by
/// the caller on its next `list`, mirroring the eventual-consistency
/// contract. Fault injection flags make each operation fail on demand, and
/// the full call history is kept for assertions.
pub struct FakeControlPlane {
    capacity_per_runner: u64,
    state: Mutex<FakeState>,
}

impl FakeControlPlane {
    pub fn new(capacity_per_runner: u64) -> Self {
        Self {
            capacity_per_runner,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Cap how many runners a single provision call admits.
    pub async fn set_admission_limit(&self, limit: Option<usize>) {
        self.state.lock().await.admission_limit = limit;
    }

    pub async fn set_fail_provision(&self, fail: bool) {
        self.state.lock().await.fail_provision = fail;
    }

    pub async fn set_fail_list(&self, fail: bool) {
        self.state.lock().await.fail_list = fail;
    }

    pub async fn set_fail_remove(&self, fail: bool) {
        self.state.lock().await.fail_remove = fail;
    }

    pub async fn provision_calls(&self) -> Vec<(GroupId, usize)> {
        self.state.lock().await.provision_calls.clone()
    }

    pub async fn remove_calls(&self) -> Vec<(GroupId, RunnerId)> {
        self.state.lock().await.remove_calls.clone()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn provision(&self, group_id: &GroupId, count: usize) -> Result<usize> {
        let mut state = self.state.lock().await;
        state.provision_calls.push((group_id.clone(), count));
        if state.fail_provision {
            bail!("control plane provisioning unavailable");
        }
        let granted = match state.admission_limit {
            Some(limit) => count.min(limit),
            None => count,
        };
        for _ in 0..granted {
            let n = state.next_runner;
            state.next_runner += 1;
            let host = RunnerHost {
                id: RunnerId::from(format!("r-{n:04}").as_str()),
                address: format!("runner-{n:04}.internal:8191"),
                capacity: self.capacity_per_runner,
            };
            state.hosts.entry(group_id.clone()).or_default().push(host);
        }
        Ok(granted)
    }

    async fn list(&self, group_id: &GroupId) -> Result<Vec<RunnerHost>> {
        let state = self.state.lock().await;
        if state.fail_list {
            bail!("control plane listing unavailable");
        }
        Ok(state.hosts.get(group_id).cloned().unwrap_or_default())
    }

    async fn remove(&self, group_id: &GroupId, runner_id: &RunnerId) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .remove_calls
            .push((group_id.clone(), runner_id.clone()));
        if state.fail_remove {
            bail!("control plane teardown unavailable");
        }
        if let Some(hosts) = state.hosts.get_mut(group_id) {
            hosts.retain(|host| host.id != *runner_id);
        }
        Ok(())
    }
}

/// Harness wiring a [`PoolManager`](crate::PoolManager) to a
/// [`FakeControlPlane`] with the default tunables.
#[cfg(test)]
pub(crate) struct TestPool {
    pub manager: crate::PoolManager,
    pub control_plane: Arc<FakeControlPlane>,
}

#[cfg(test)]
impl TestPool {
    pub(crate) fn new() -> Result<Self> {
        use tracing_subscriber::{Layer, layer::SubscriberExt};

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let config = crate::PoolManagerConfig::default();
        let control_plane = Arc::new(FakeControlPlane::new(config.capacity_per_runner));
        let manager = crate::PoolManager::new(control_plane.clone(), config)?;
        Ok(Self {
            manager,
            control_plane,
        })
    }
}
