//! Control plane seam.
//!
//! The pool manager never creates or destroys runners itself. It asks the
//! control plane to provision or remove them and treats the control plane's
//! listing as the authoritative inventory, tolerating eventual consistency:
//! provisioned runners appear on a later listing, removed runners disappear
//! on a later listing.

use anyhow::Result;
use async_trait::async_trait;

use crate::data_model::{GroupId, RunnerId};

/// One runner as enumerated by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerHost {
    pub id: RunnerId,
    pub address: String,
    pub capacity: u64,
}

/// Provisioning backend operations consumed by group controllers.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Request up to `count` new runners for the group. Returns how many the
    /// control plane actually admitted; granted runners show up on a
    /// subsequent [`list`](Self::list).
    async fn provision(&self, group_id: &GroupId, count: usize) -> Result<usize>;

    /// Authoritative enumeration of the runners currently associated with
    /// the group.
    async fn list(&self, group_id: &GroupId) -> Result<Vec<RunnerHost>>;

    /// Ask for teardown of one runner. The effect is observed when a later
    /// [`list`](Self::list) no longer contains the id.
    async fn remove(&self, group_id: &GroupId, runner_id: &RunnerId) -> Result<()>;
}
