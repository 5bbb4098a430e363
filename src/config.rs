use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::MIN_SLOT_INTERVAL;
use crate::model::{LockKind, Minute, Ms};

/// Lock hold times and slot generation policy for the reservation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Generation interval for candidate start times, in minutes.
    pub slot_interval: Minute,
    /// Hold for a single-service booking.
    pub lock_ttl: Duration,
    /// Hold for a bundled package booking.
    pub package_lock_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_interval: 30,
            lock_ttl: Duration::from_secs(15 * 60),
            package_lock_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl EngineConfig {
    pub fn ttl_ms(&self, kind: LockKind) -> Ms {
        let ttl = match kind {
            LockKind::Standard => self.lock_ttl,
            LockKind::Package => self.package_lock_ttl,
        };
        ttl.as_millis() as Ms
    }

    /// Clamp nonsensical values rather than refusing to start.
    pub fn sanitized(mut self) -> Self {
        self.slot_interval = self.slot_interval.max(MIN_SLOT_INTERVAL);
        if self.lock_ttl.is_zero() {
            self.lock_ttl = EngineConfig::default().lock_ttl;
        }
        if self.package_lock_ttl.is_zero() {
            self.package_lock_ttl = EngineConfig::default().package_lock_ttl;
        }
        self
    }
}

/// Server process configuration, read from `SLOTKEEP_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "slotkeep".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            engine: EngineConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let engine = EngineConfig {
            slot_interval: env_parse("SLOTKEEP_SLOT_INTERVAL_MINUTES")
                .unwrap_or(defaults.engine.slot_interval),
            lock_ttl: env_parse("SLOTKEEP_LOCK_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine.lock_ttl),
            package_lock_ttl: env_parse("SLOTKEEP_PACKAGE_LOCK_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine.package_lock_ttl),
        }
        .sanitized();

        Self {
            bind: std::env::var("SLOTKEEP_BIND").unwrap_or(defaults.bind),
            port: env_parse("SLOTKEEP_PORT").unwrap_or(defaults.port),
            data_dir: std::env::var("SLOTKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: std::env::var("SLOTKEEP_PASSWORD").unwrap_or(defaults.password),
            max_connections: env_parse("SLOTKEEP_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: env_parse("SLOTKEEP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: env_parse("SLOTKEEP_METRICS_PORT"),
            tls_cert: std::env::var("SLOTKEEP_TLS_CERT").ok(),
            tls_key: std::env::var("SLOTKEEP_TLS_KEY").ok(),
            engine,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotkeep.wal")
    }
}

/// Timers and timeouts for the client-side booking flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on any single store call (fetch, acquire, release, confirm).
    pub request_timeout: Duration,
    /// Background re-fetch cadence while a slot view is active.
    pub refresh_interval: Duration,
    /// A view older than this is flagged stale.
    pub stale_after: Duration,
    /// Delay before the one-off re-fetch after a booking is confirmed.
    pub post_booking_refetch_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            post_booking_refetch_delay: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttls_differ_by_kind() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.ttl_ms(LockKind::Standard), 15 * 60 * 1000);
        assert_eq!(cfg.ttl_ms(LockKind::Package), 30 * 60 * 1000);
    }

    #[test]
    fn sanitize_clamps_interval_and_zero_ttl() {
        let cfg = EngineConfig {
            slot_interval: 0,
            lock_ttl: Duration::ZERO,
            package_lock_ttl: Duration::from_secs(60),
        }
        .sanitized();
        assert_eq!(cfg.slot_interval, MIN_SLOT_INTERVAL);
        assert_eq!(cfg.lock_ttl, Duration::from_secs(900));
        assert_eq!(cfg.package_lock_ttl, Duration::from_secs(60));
    }
}
