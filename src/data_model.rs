use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Convert a wire-format megabyte quantity into internal bytes.
pub fn mem_mb_to_bytes(mem_mb: u64) -> u64 {
    mem_mb * BYTES_PER_MB
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct GroupId(String);

impl Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl GroupId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupId {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for GroupId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identity of a reporting front-end load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct LbId(String);

impl Display for LbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl LbId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LbId {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for LbId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Globally unique runner identity. Addresses may be recycled by the control
/// plane; ids never are.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RunnerId(String);

impl Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl RunnerId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunnerId {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl From<String> for RunnerId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A single entry in a load balancer's capacity report: an absolute assertion
/// of the memory the LB wants for one group, made at send time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub group_id: GroupId,
    pub mem_mb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    Active,
    Draining,
    Dead,
}

/// A backend worker tracked by a group's pool.
///
/// `capacity` is immutable for the life of the runner and equals the
/// per-runner provisioning unit. `kill_after` is set while draining and
/// bounds how long the runner may linger before teardown. `removal_sent`
/// records whether the control plane has accepted a teardown request for a
/// dead runner; a failed request leaves it false so the next poll retries.
#[derive(Debug, Clone)]
pub struct Runner {
    pub id: RunnerId,
    pub address: String,
    pub status: RunnerStatus,
    pub capacity: u64,
    pub kill_after: Option<Instant>,
    pub removal_sent: bool,
}
