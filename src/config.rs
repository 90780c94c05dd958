//! Service configuration
//!
//! Values come from a YAML file and are then overridden by `SERVICE_*`
//! environment variables. Unparsable overrides are logged and ignored;
//! non-positive values fall back to their defaults.

use crate::cache::{
    SatelliteCache, DEFAULT_IDLE_TTL, DEFAULT_MAX_LOADED_SATS, DEFAULT_SWEEP_INTERVAL,
};
use crate::dispatch::{DispatchSettings, DEFAULT_DIVERGENCE_BUDGET};
use crate::error::XpropError;
use crate::propagation::{PropagationLimits, DEFAULT_DECAY_ALTITUDE_KM, DEFAULT_STALE_AFTER_DAYS};
use crate::stream::DEFAULT_CHUNK_SIZE;
use crate::Result;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config/cfg_default.yaml";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub const CONFIG_PATH_ENV: &str = "SERVICE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub stream_chunk_size: usize,
    #[serde(with = "duration_str")]
    pub graceful_stop_timeout: Duration,
    pub max_parallel_tasks: usize,
    pub divergence_budget: usize,
    pub stale_after_days: i64,
    pub decay_altitude_km: f64,
    pub gc: GcConfig,
    /// 0 disables the metrics endpoint
    pub metrics_port: u16,
    /// Register gRPC server reflection
    pub reflection: bool,
}

/// Satellite cache housekeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub max_loaded_sats: usize,
    #[serde(with = "duration_str")]
    pub idle_ttl: Duration,
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            stream_chunk_size: DEFAULT_CHUNK_SIZE,
            graceful_stop_timeout: DEFAULT_GRACEFUL_STOP_TIMEOUT,
            max_parallel_tasks: DispatchSettings::default().max_parallel_tasks,
            divergence_budget: DEFAULT_DIVERGENCE_BUDGET,
            stale_after_days: DEFAULT_STALE_AFTER_DAYS,
            decay_altitude_km: DEFAULT_DECAY_ALTITUDE_KM,
            gc: GcConfig::default(),
            metrics_port: 0,
            reflection: false,
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_loaded_sats: DEFAULT_MAX_LOADED_SATS,
            idle_ttl: DEFAULT_IDLE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl ServiceConfig {
    /// Load from `path` (or `SERVICE_CONFIG`, or the default path), then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    /// Read a YAML file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "Config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&text).map_err(|e| match e {
            XpropError::ConfigError(msg) => {
                XpropError::ConfigError(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| XpropError::ConfigError(e.to_string()))
    }

    /// Apply `SERVICE_*` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SERVICE_HOST") {
            info!("Config override SERVICE_HOST={}", host);
            self.host = host;
        }
        override_parsed(&lookup, "SERVICE_PORT", &mut self.port);
        override_parsed(&lookup, "SERVICE_STREAM_CHUNK_SIZE", &mut self.stream_chunk_size);
        override_duration(
            &lookup,
            "SERVICE_GRACEFUL_STOP_TIMEOUT_SEC",
            Duration::from_secs(1),
            &mut self.graceful_stop_timeout,
        );
        override_parsed(&lookup, "SERVICE_MAX_PARALLEL_TASKS", &mut self.max_parallel_tasks);
        override_parsed(&lookup, "SERVICE_DIVERGENCE_BUDGET", &mut self.divergence_budget);
        override_parsed(&lookup, "SERVICE_STALE_AFTER_DAYS", &mut self.stale_after_days);
        override_parsed(&lookup, "SERVICE_DECAY_ALTITUDE_KM", &mut self.decay_altitude_km);
        override_parsed(&lookup, "SERVICE_MAX_LOADED_SATS_GC", &mut self.gc.max_loaded_sats);
        override_duration(
            &lookup,
            "SERVICE_IDLE_TTL_GC_MIN",
            Duration::from_secs(60),
            &mut self.gc.idle_ttl,
        );
        override_duration(
            &lookup,
            "SERVICE_SWEEP_INTERVAL_GC_MIN",
            Duration::from_secs(60),
            &mut self.gc.sweep_interval,
        );
        override_parsed(&lookup, "SERVICE_METRICS_PORT", &mut self.metrics_port);
        override_parsed(&lookup, "SERVICE_REFLECTION", &mut self.reflection);
    }

    /// Replace non-positive values with defaults
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        if self.port == 0 {
            warn!("port must be positive, using {}", defaults.port);
            self.port = defaults.port;
        }
        if self.stream_chunk_size == 0 {
            warn!(
                "stream_chunk_size must be positive, using {}",
                defaults.stream_chunk_size
            );
            self.stream_chunk_size = defaults.stream_chunk_size;
        }
        if self.graceful_stop_timeout.is_zero() {
            self.graceful_stop_timeout = defaults.graceful_stop_timeout;
        }
        if self.max_parallel_tasks == 0 {
            self.max_parallel_tasks = defaults.max_parallel_tasks;
        }
        if self.divergence_budget == 0 {
            self.divergence_budget = defaults.divergence_budget;
        }
        if self.stale_after_days <= 0 {
            self.stale_after_days = defaults.stale_after_days;
        }
        if self.decay_altitude_km.is_nan() || self.decay_altitude_km <= 0.0 {
            self.decay_altitude_km = defaults.decay_altitude_km;
        }
        if self.gc.max_loaded_sats == 0 {
            self.gc.max_loaded_sats = defaults.gc.max_loaded_sats;
        }
        if self.gc.idle_ttl.is_zero() {
            self.gc.idle_ttl = defaults.gc.idle_ttl;
        }
        if self.gc.sweep_interval.is_zero() {
            self.gc.sweep_interval = defaults.gc.sweep_interval;
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip = IpAddr::from_str(&self.host)
            .map_err(|e| XpropError::ConfigError(format!("host {}: {}", self.host, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Address of the metrics endpoint, when enabled
    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        if self.metrics_port == 0 {
            return Ok(None);
        }
        let addr = self.socket_addr()?;
        Ok(Some(SocketAddr::new(addr.ip(), self.metrics_port)))
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            chunk_size: self.stream_chunk_size,
            max_parallel_tasks: self.max_parallel_tasks,
            divergence_budget: self.divergence_budget,
        }
    }

    pub fn propagation_limits(&self) -> PropagationLimits {
        PropagationLimits {
            decay_altitude_km: self.decay_altitude_km,
            stale_after: TimeDelta::days(self.stale_after_days),
        }
    }

    pub fn satellite_cache(&self) -> SatelliteCache {
        SatelliteCache::new(
            self.gc.max_loaded_sats,
            self.gc.idle_ttl,
            self.propagation_limits(),
        )
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => {
            info!("Config override {}={}", key, raw);
            *target = value;
        }
        Err(_) => warn!("Ignoring invalid {}={}", key, raw),
    }
}

/// Plain numbers are read in `unit`, anything else as a duration string
fn override_duration<F>(lookup: &F, key: &str, unit: Duration, target: &mut Duration)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    let parsed = match raw.trim().parse::<u32>() {
        Ok(n) => Ok(unit * n),
        Err(_) => parse_duration(&raw),
    };
    match parsed {
        Ok(value) => {
            info!("Config override {}={}", key, raw);
            *target = value;
        }
        Err(e) => warn!("Ignoring invalid {}={}: {}", key, raw, e),
    }
}

/// Parse `500ms`, `30s`, `5m` or `1h`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000u64)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000u64)
    } else {
        return Err(XpropError::ConfigError(format!(
            "Invalid duration `{}`. Use: 30s, 5m, 1h, 500ms",
            s
        )));
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| XpropError::ConfigError(format!("Invalid duration number `{}`", s)))?;
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| XpropError::ConfigError(format!("Duration `{}` is too long", s)))
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 3_600_000 == 0 && ms > 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{}ms", ms)
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
