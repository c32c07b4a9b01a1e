//! Config file and flag merging
//!
//! Every key in the config file is optional and only supplies a default for
//! the flag of the same name; flags given on the command line win.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;

use rtlogs_collector::{CollectionOptions, ReadinessPolicy};
use rtlogs_k8s::HelmDriver;
use rtlogs_types::{DEFAULT_POLL_INTERVAL, DEFAULT_READINESS_BUDGET};

use crate::Args;

/// Readiness policy as named on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessMode {
    /// Tail a pod as soon as it leaves Pending
    Phase,
    /// Wait for Running, giving up after --wait-fail-pods-timeout
    Running,
}

/// Contents of `config.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub stop_timeout: Option<u64>,
    pub stop_string: Option<String>,
    pub time_since: Option<u64>,
    pub wait_fail_pods_timeout: Option<u64>,
    pub readiness: Option<ReadinessMode>,
    pub poll_interval: Option<u64>,
    pub only_failed: Option<bool>,
    pub container: Option<String>,
    pub debug: Option<bool>,
    pub namespace: Option<String>,
    pub kube_context: Option<String>,
    pub helm_driver: Option<String>,
}

impl FileConfig {
    /// `<config dir>/helm-rtlogs/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        let config_dir = dirs::config_dir()?;
        Some(config_dir.join("helm-rtlogs").join("config.toml"))
    }

    /// Load an explicit file, or the default one if it exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .context(format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).context(format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Fully resolved settings for one run
#[derive(Debug)]
pub struct Settings {
    pub release: String,
    pub namespace: Option<String>,
    pub kube_context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub helm_driver: HelmDriver,
    pub options: CollectionOptions,
}

impl Settings {
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self> {
        let helm_driver = match (args.helm_driver, file.helm_driver.as_deref()) {
            (Some(driver), _) => driver,
            (None, Some(name)) => name
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid helm-driver in config file")?,
            (None, None) => HelmDriver::default(),
        };

        let readiness = match args.readiness.or(file.readiness).unwrap_or(ReadinessMode::Phase) {
            ReadinessMode::Phase => ReadinessPolicy::UntilNotPending,
            ReadinessMode::Running => ReadinessPolicy::UntilRunning {
                budget: args
                    .wait_fail_pods_timeout
                    .or(file.wait_fail_pods_timeout)
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_READINESS_BUDGET),
            },
        };

        let poll_interval = args
            .poll_interval
            .or(file.poll_interval)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        anyhow::ensure!(!poll_interval.is_zero(), "poll-interval must be at least 1 second");

        let options = CollectionOptions::default()
            .with_stop_timeout(secs(args.stop_timeout.or(file.stop_timeout)))
            .with_stop_string(args.stop_string.or(file.stop_string).unwrap_or_default())
            .with_since(secs(args.time_since.or(file.time_since)))
            .with_only_failed(args.only_failed || file.only_failed.unwrap_or(false))
            .with_readiness(readiness)
            .with_poll_interval(poll_interval)
            .with_container(args.container.or(file.container))
            .with_debug(args.debug || file.debug.unwrap_or(false));

        Ok(Self {
            release: args.release,
            namespace: args.namespace.or(file.namespace),
            kube_context: args.kube_context.or(file.kube_context),
            kubeconfig: args.kubeconfig,
            helm_driver,
            options,
        })
    }
}

fn secs(value: Option<u64>) -> Duration {
    Duration::from_secs(value.unwrap_or(0))
}
