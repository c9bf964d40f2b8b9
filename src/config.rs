use std::time::Duration;

use anyhow::Result;
use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

/// 512 MiB per runner unless the platform overrides it.
pub const DEFAULT_CAPACITY_PER_RUNNER: u64 = 512 * 1024 * 1024;

/// Tunables for the capacity control loops. All durations are expressed in
/// milliseconds in the YAML form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolManagerConfig {
    /// Period between sweeps that expire requirements no LB has refreshed.
    #[serde(with = "duration_ms")]
    pub purge_interval: Duration,
    /// Freshness bound on capacity assertions, both for keeping an LB's
    /// requirement alive and for acting on a dequeued scale decision.
    #[serde(with = "duration_ms")]
    pub valid_requirement_age: Duration,
    /// Period between reconciles against the control plane's listing.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Cap on the number of runners requested in a single provision call.
    pub largest_request_at_once: u32,
    /// How long a draining runner may linger before it is torn down.
    #[serde(with = "duration_ms")]
    pub max_draindown_lifetime: Duration,
    /// Bytes of capacity each runner contributes. Platform-defined.
    pub capacity_per_runner: u64,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        PoolManagerConfig {
            purge_interval: Duration::from_secs(5),
            valid_requirement_age: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
            largest_request_at_once: 20,
            max_draindown_lifetime: Duration::from_secs(120),
            capacity_per_runner: DEFAULT_CAPACITY_PER_RUNNER,
        }
    }
}

impl PoolManagerConfig {
    pub fn from_path(path: &str) -> Result<PoolManagerConfig> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&config_str)
    }

    fn from_yaml_str(config_str: &str) -> Result<PoolManagerConfig> {
        let config: PoolManagerConfig =
            Figment::from(Serialized::defaults(PoolManagerConfig::default()))
                .merge(Yaml::string(config_str))
                .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity_per_runner == 0 {
            return Err(anyhow::anyhow!("capacity_per_runner must be non-zero"));
        }
        if self.largest_request_at_once == 0 {
            return Err(anyhow::anyhow!("largest_request_at_once must be non-zero"));
        }
        if self.purge_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(anyhow::anyhow!("control loop intervals must be non-zero"));
        }
        if self.valid_requirement_age.is_zero() {
            return Err(anyhow::anyhow!("valid_requirement_age must be non-zero"));
        }
        Ok(())
    }
}

// Serde module for millisecond-granular durations.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
