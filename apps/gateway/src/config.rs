use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::gateway::aggregator::{AggregatorSettings, SmoothingMode};
use crate::gateway::buffer::BufferSettings;
use crate::gateway::executor::{default_worker_count, ExecutorSettings};
use crate::gateway::lifecycle::LifecycleSettings;
use crate::gateway::sampler::DebugSampler;
use crate::gateway::scheduler::SchedulerSettings;
use crate::gateway::GatewaySettings;

/// Application configuration loaded from environment variables.
/// Everything has a default; malformed values fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Base URL of the analysis sidecar. Unset = run degraded.
    pub analyzer_url: Option<String>,
    pub analyzer_timeout: Duration,
    pub worker_count: usize,
    pub job_queue_capacity: usize,
    pub video_buffer_capacity: usize,
    pub audio_buffer_capacity: usize,
    pub min_analysis_interval: Duration,
    pub job_timeout: Duration,
    pub smoothing: SmoothingMode,
    pub idle_timeout: Duration,
    pub session_ttl: Duration,
    pub cleanup_interval: Duration,
    pub debug_sample_dir: Option<PathBuf>,
    pub debug_sample_every: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            port: parse_or(&var, "PORT", 8080)?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            analyzer_url: var("ANALYZER_URL"),
            analyzer_timeout: Duration::from_millis(parse_or(&var, "ANALYZER_TIMEOUT_MS", 10_000)?),
            worker_count: positive(parse_or(&var, "WORKER_COUNT", default_worker_count())?, "WORKER_COUNT")?,
            job_queue_capacity: positive(parse_or(&var, "JOB_QUEUE_CAPACITY", 200)?, "JOB_QUEUE_CAPACITY")?,
            video_buffer_capacity: positive(
                parse_or(&var, "VIDEO_BUFFER_CAPACITY", 30)?,
                "VIDEO_BUFFER_CAPACITY",
            )?,
            audio_buffer_capacity: positive(
                parse_or(&var, "AUDIO_BUFFER_CAPACITY", 10)?,
                "AUDIO_BUFFER_CAPACITY",
            )?,
            min_analysis_interval: Duration::from_millis(parse_or(
                &var,
                "MIN_ANALYSIS_INTERVAL_MS",
                500,
            )?),
            job_timeout: Duration::from_millis(parse_or(&var, "JOB_TIMEOUT_MS", 5_000)?),
            smoothing: match var("SMOOTHING") {
                Some(raw) => SmoothingMode::from_str(&raw)
                    .map_err(|e| anyhow!(e))
                    .context("SMOOTHING must be 'simple' or 'continuous'")?,
                None => SmoothingMode::Continuous,
            },
            idle_timeout: Duration::from_secs(parse_or(&var, "IDLE_TIMEOUT_SECS", 120)?),
            session_ttl: Duration::from_secs(parse_or(&var, "SESSION_TTL_SECS", 1_800)?),
            cleanup_interval: Duration::from_secs(parse_or(&var, "CLEANUP_INTERVAL_SECS", 30)?),
            debug_sample_dir: var("DEBUG_SAMPLE_DIR").map(PathBuf::from),
            debug_sample_every: parse_or(&var, "DEBUG_SAMPLE_EVERY", 100)?,
        })
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            lifecycle: LifecycleSettings {
                buffer: BufferSettings {
                    video_capacity: self.video_buffer_capacity,
                    audio_capacity: self.audio_buffer_capacity,
                },
                aggregator: AggregatorSettings {
                    smoothing: self.smoothing,
                    ..Default::default()
                },
            },
            scheduler: SchedulerSettings {
                min_interval: self.min_analysis_interval,
            },
            executor: ExecutorSettings {
                workers: self.worker_count,
                queue_capacity: self.job_queue_capacity,
                job_timeout: self.job_timeout,
            },
            idle_timeout: self.idle_timeout,
            session_ttl: self.session_ttl,
            cleanup_interval: self.cleanup_interval,
            debug_sampler: self
                .debug_sample_dir
                .as_ref()
                .map(|dir| DebugSampler::new(dir, self.debug_sample_every)),
        }
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn positive(value: usize, key: &str) -> Result<usize> {
    if value == 0 {
        return Err(anyhow!("{key} must be at least 1"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.rust_log, "info");
        assert!(cfg.analyzer_url.is_none());
        assert_eq!(cfg.job_queue_capacity, 200);
        assert_eq!(cfg.video_buffer_capacity, 30);
        assert_eq!(cfg.audio_buffer_capacity, 10);
        assert_eq!(cfg.min_analysis_interval, Duration::from_millis(500));
        assert_eq!(cfg.job_timeout, Duration::from_secs(5));
        assert_eq!(cfg.smoothing, SmoothingMode::Continuous);
        assert_eq!(cfg.session_ttl, Duration::from_secs(1800));
        assert!(cfg.worker_count >= 1);

        let settings = cfg.gateway_settings();
        assert!(settings.debug_sampler.is_none());
        assert_eq!(settings.lifecycle.buffer, BufferSettings::default());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("PORT", "9000"),
            ("ANALYZER_URL", "http://localhost:5001"),
            ("WORKER_COUNT", "3"),
            ("SMOOTHING", "Simple"),
            ("DEBUG_SAMPLE_DIR", "/tmp/samples"),
            ("DEBUG_SAMPLE_EVERY", "10"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.analyzer_url.as_deref(), Some("http://localhost:5001"));
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.smoothing, SmoothingMode::Simple);

        let settings = cfg.gateway_settings();
        assert_eq!(settings.executor.workers, 3);
        let sampler = settings.debug_sampler.unwrap();
        assert!(sampler.should_sample(10));
        assert!(!sampler.should_sample(11));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let cfg = config(&[("PORT", ""), ("ANALYZER_URL", "  ")]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.analyzer_url.is_none());
    }

    #[test]
    fn test_invalid_values_fail() {
        let err = config(&[("PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
        assert!(config(&[("WORKER_COUNT", "0")]).is_err());
        assert!(config(&[("SMOOTHING", "jumpy")]).is_err());
    }
}
