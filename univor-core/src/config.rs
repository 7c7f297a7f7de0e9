//! Engine configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use univor_driver::{DiskPolicy, DriverKind};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of commands executing at once
    pub workers: usize,

    /// Upper bound for a single driver call; expiry counts as unreachable
    pub driver_timeout_secs: u64,

    /// Extra attempts after a transient driver failure
    pub transient_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub retry_backoff_ms: u64,

    /// Graceful shutdown timeout handed to the driver on stop
    pub stop_timeout_secs: u64,

    /// Finished commands kept in the results store
    pub results_capacity: usize,

    /// Optional JSON-lines file mirroring the command log
    pub command_log_path: Option<PathBuf>,

    /// Disk handling on undeploy when the command does not say.
    /// No default: without it every undeploy must pass `release_disks`.
    pub undeploy_disk_policy: Option<DiskPolicy>,

    /// Hypervisor instances, keyed by the name `use_hypervisor` refers to
    pub hypervisors: BTreeMap<String, HypervisorConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            driver_timeout_secs: 60,
            transient_retries: 3,
            retry_backoff_ms: 200,
            stop_timeout_secs: 30,
            results_capacity: 1000,
            command_log_path: None,
            undeploy_disk_policy: None,
            hypervisors: BTreeMap::new(),
        }
    }
}

/// One hypervisor instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypervisorConfig {
    /// Driver implementation to use
    pub kind: DriverKind,

    /// Management endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Login user for the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl HypervisorConfig {
    pub fn mock() -> Self {
        Self {
            kind: DriverKind::Mock,
            url: None,
            user: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.driver_timeout_secs == 0 {
            bail!("driver_timeout_secs must be at least 1");
        }
        if self.stop_timeout_secs == 0 {
            bail!("stop_timeout_secs must be at least 1");
        }
        if self.results_capacity == 0 {
            bail!("results_capacity must be at least 1");
        }
        if let Some(name) = self.hypervisors.keys().find(|n| n.trim().is_empty()) {
            bail!("Invalid hypervisor name: {:?}", name);
        }
        Ok(())
    }

    pub fn with_mock_hypervisor(mut self, name: impl Into<String>) -> Self {
        self.hypervisors.insert(name.into(), HypervisorConfig::mock());
        self
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_secs(self.driver_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.driver_timeout(), Duration::from_secs(60));
        assert!(config.undeploy_disk_policy.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "workers: 8\nundeploy_disk_policy: retain\nhypervisors:\n  ESXi_1:\n    kind: mock\n    url: https://esxi1.lab\n"
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.results_capacity, 1000);
        assert_eq!(config.undeploy_disk_policy, Some(DiskPolicy::Retain));
        assert_eq!(config.hypervisors["ESXi_1"].url.as_deref(), Some("https://esxi1.lab"));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers: 0").unwrap();
        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_backoff(1), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(800));
    }
}
