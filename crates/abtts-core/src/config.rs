use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::StartStrategy;
use crate::probe::ProbePolicy;
use crate::retry::RetryPolicy;
use crate::worker::WorkerPolicy;

/// Retry parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per unit (including the first).
    pub max_attempts: u32,
    /// Pause between attempts in seconds.
    pub backoff_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 2.0,
        }
    }
}

/// Safety-probe parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Run the pre-flight trial before any multi-worker run.
    pub enabled: bool,
    /// Probe worker count.
    pub workers: usize,
    /// Units attempted across all probe workers.
    pub units: usize,
    /// Margin below the checkpoint threshold at which a hard limit is
    /// attributed to a shared (super-session) limit.
    pub hard_limit_slack: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 2,
            units: 100,
            hard_limit_slack: 5,
        }
    }
}

/// How simultaneous verification pauses are spread across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Simultaneous,
    Staggered,
    Batched,
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simultaneous" => Ok(StrategyKind::Simultaneous),
            "staggered" => Ok(StrategyKind::Staggered),
            "batched" => Ok(StrategyKind::Batched),
            other => anyhow::bail!(
                "unknown strategy '{}' (expected simultaneous, staggered, or batched)",
                other
            ),
        }
    }
}

/// Worker start scheduling (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub strategy: StrategyKind,
    /// Delay between worker starts for the staggered strategy, in seconds.
    pub stagger_interval_secs: u64,
    /// In-flight worker cap for the batched strategy.
    pub batch_size: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Simultaneous,
            stagger_interval_secs: 10,
            batch_size: 3,
        }
    }
}

/// Global configuration loaded from `~/.config/abtts/config.toml`.
///
/// The quota constants are empirically tuned against the remote's observed
/// behavior and deliberately live in configuration: the threshold must stay
/// strictly below the external wall (55 against a ~60-request limit) to
/// leave margin for races, and the wall itself can only be re-measured, not
/// derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbttsConfig {
    /// TTS service endpoint. Must be set before a run can send anything.
    #[serde(default)]
    pub service_url: Option<String>,
    /// Voice used when the CLI does not override it.
    #[serde(default)]
    pub default_voice: Option<String>,
    /// Requests per session before a proactive verification pause.
    pub checkpoint_threshold: u32,
    /// Fixed delay between consecutive sends within one session, seconds.
    pub request_delay_secs: f64,
    /// Hard cap on concurrent worker sessions.
    pub max_workers: usize,
    /// Sizing target for auto worker count; defaults to the checkpoint
    /// threshold (one pause per worker when the run exactly fits).
    #[serde(default)]
    pub target_units_per_worker: Option<u32>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
    #[serde(default)]
    pub parallel: Option<ParallelConfig>,
}

impl Default for AbttsConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            default_voice: None,
            checkpoint_threshold: 55,
            request_delay_secs: 2.0,
            max_workers: 15,
            target_units_per_worker: None,
            retry: None,
            probe: None,
            parallel: None,
        }
    }
}

impl AbttsConfig {
    /// Per-worker pacing/budget policy derived from this config.
    pub fn worker_policy(&self) -> WorkerPolicy {
        let retry = self.retry.clone().unwrap_or_default();
        WorkerPolicy {
            checkpoint_threshold: self.checkpoint_threshold,
            request_delay: Duration::from_secs_f64(self.request_delay_secs.max(0.0)),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                backoff: Duration::from_secs_f64(retry.backoff_secs.max(0.0)),
            },
        }
    }

    /// Probe scale/detection policy derived from this config.
    pub fn probe_policy(&self) -> ProbePolicy {
        let p = self.probe.clone().unwrap_or_default();
        ProbePolicy {
            workers: p.workers,
            units: p.units,
            hard_limit_slack: p.hard_limit_slack,
        }
    }

    /// True unless the probe section disables pre-flight.
    pub fn probe_enabled(&self) -> bool {
        self.probe.as_ref().map(|p| p.enabled).unwrap_or(true)
    }

    /// Worker start strategy derived from this config, with an optional
    /// override of the strategy kind (CLI flag).
    pub fn start_strategy(&self, kind_override: Option<StrategyKind>) -> StartStrategy {
        let parallel = self.parallel.clone().unwrap_or_default();
        let kind = kind_override.unwrap_or(parallel.strategy);
        match kind {
            StrategyKind::Simultaneous => StartStrategy::Simultaneous,
            StrategyKind::Staggered => {
                StartStrategy::Staggered(Duration::from_secs(parallel.stagger_interval_secs))
            }
            StrategyKind::Batched => StartStrategy::Batched(parallel.batch_size.max(1)),
        }
    }

    /// Sizing target for auto worker count.
    pub fn target_units_per_worker(&self) -> u32 {
        self.target_units_per_worker
            .unwrap_or(self.checkpoint_threshold)
            .max(1)
    }

    /// Validated service endpoint, required before any send.
    pub fn service_endpoint(&self) -> Result<url::Url> {
        let raw = self
            .service_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("service_url is not configured (set it in config.toml or pass --service-url)"))?;
        url::Url::parse(raw).map_err(|e| anyhow::anyhow!("invalid service_url '{}': {}", raw, e))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("abtts")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<AbttsConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = AbttsConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: AbttsConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = AbttsConfig::default();
        assert_eq!(cfg.checkpoint_threshold, 55);
        assert_eq!(cfg.max_workers, 15);
        assert!((cfg.request_delay_secs - 2.0).abs() < 1e-9);
        assert_eq!(cfg.target_units_per_worker(), 55);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = AbttsConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AbttsConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.checkpoint_threshold, cfg.checkpoint_threshold);
        assert_eq!(parsed.max_workers, cfg.max_workers);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            service_url = "https://tts.example.com/api"
            default_voice = "en-US-standard-3"
            checkpoint_threshold = 40
            request_delay_secs = 1.5
            max_workers = 8
            target_units_per_worker = 50
        "#;
        let cfg: AbttsConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.checkpoint_threshold, 40);
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.target_units_per_worker(), 50);
        assert!(cfg.service_endpoint().is_ok());
        assert!(cfg.retry.is_none());
        assert!(cfg.probe.is_none());
    }

    #[test]
    fn config_toml_sections() {
        let toml = r#"
            checkpoint_threshold = 55
            request_delay_secs = 2.0
            max_workers = 15

            [retry]
            max_attempts = 4
            backoff_secs = 0.5

            [probe]
            enabled = false
            workers = 3
            units = 60
            hard_limit_slack = 10

            [parallel]
            strategy = "staggered"
            stagger_interval_secs = 15
            batch_size = 2
        "#;
        let cfg: AbttsConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.worker_policy().retry.max_attempts, 4);
        assert!(!cfg.probe_enabled());
        assert_eq!(cfg.probe_policy().units, 60);
        assert_eq!(
            cfg.start_strategy(None),
            StartStrategy::Staggered(Duration::from_secs(15))
        );
        assert_eq!(
            cfg.start_strategy(Some(StrategyKind::Batched)),
            StartStrategy::Batched(2)
        );
    }

    #[test]
    fn missing_service_url_is_an_error() {
        let cfg = AbttsConfig::default();
        assert!(cfg.service_endpoint().is_err());
    }

    #[test]
    fn strategy_kind_parses() {
        assert_eq!(
            "staggered".parse::<StrategyKind>().unwrap(),
            StrategyKind::Staggered
        );
        assert!("round-robin".parse::<StrategyKind>().is_err());
    }
}
