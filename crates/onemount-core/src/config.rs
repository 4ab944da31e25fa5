//! Configuration for the OneMount daemon.
//!
//! Maps to the YAML configuration file (spec section 6, "CLI surface") plus
//! the tunables named throughout spec sections 4 and 5: worker counts,
//! chunk sizes, cache ceiling/expiration, polling intervals, and per-call
//! timeouts. Loading, validation, defaults, and a builder all follow the
//! pattern of the teacher's own `Config`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for OneMount.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub mount: MountConfig,
    pub cache: CacheConfig,
    pub download: DownloadConfig,
    pub upload: UploadConfig,
    pub delta: DeltaConfig,
    pub timeouts: TimeoutsConfig,
    pub logging: LoggingConfig,
}

/// Where the filesystem is mounted and where its state lives on disk
/// (spec section 6, "Persistent state layout").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Mount-point positional argument.
    pub mount_point: PathBuf,
    /// Cache directory override; defaults under `dirs::cache_dir()`.
    pub cache_dir: PathBuf,
    /// Skip interactive OAuth and expect pre-provisioned credentials.
    pub headless_auth: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("~/OneDrive"),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("onemount"),
            headless_auth: false,
        }
    }
}

/// Content-cache sizing and eviction settings (spec section 4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 0 means unlimited.
    pub max_cache_size_bytes: u64,
    /// Bounded 1 - 30 days; invalid values fall back to 30.
    pub expiration_days: u32,
    /// Bounded 1 - 720 hours; invalid values fall back to 24.
    pub cleanup_interval_hours: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 0,
            expiration_days: 30,
            cleanup_interval_hours: 24,
        }
    }
}

impl CacheConfig {
    /// Clamps `cleanup_interval_hours` into the documented 1 hour - 30 day
    /// range, falling back to 24 hours for anything outside it (spec
    /// section 4.2, `cleanup`).
    #[must_use]
    pub fn effective_cleanup_interval(&self) -> Duration {
        const MIN_HOURS: u32 = 1;
        const MAX_HOURS: u32 = 30 * 24;
        let hours = if (MIN_HOURS..=MAX_HOURS).contains(&self.cleanup_interval_hours) {
            self.cleanup_interval_hours
        } else {
            24
        };
        Duration::from_secs(u64::from(hours) * 3600)
    }

    /// Clamps `expiration_days` into the documented 1 - 30 day range,
    /// falling back to 30 days for anything outside it (spec section 4.2,
    /// `cleanup(expiration_days)`).
    #[must_use]
    pub fn effective_expiration(&self) -> chrono::Duration {
        const MIN_DAYS: u32 = 1;
        const MAX_DAYS: u32 = 30;
        let days = if (MIN_DAYS..=MAX_DAYS).contains(&self.expiration_days) {
            self.expiration_days
        } else {
            30
        };
        chrono::Duration::days(i64::from(days))
    }
}

/// Download manager settings (spec section 4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub worker_count: usize,
    pub chunk_size_bytes: u64,
    pub max_recovery_attempts: u32,
    pub worker_shutdown_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            chunk_size_bytes: 1024 * 1024,
            max_recovery_attempts: 3,
            worker_shutdown_secs: 5,
        }
    }
}

/// Upload manager settings (spec section 4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_in_flight: usize,
    pub small_file_threshold_bytes: u64,
    pub chunk_size_bytes: u64,
    pub max_attempts: u32,
    pub max_resume_attempts: u32,
    pub graceful_shutdown_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 2,
            small_file_threshold_bytes: 4 * 1024 * 1024,
            chunk_size_bytes: 10 * 1024 * 1024,
            max_attempts: 5,
            max_resume_attempts: 3,
            graceful_shutdown_secs: 30,
        }
    }
}

/// Delta-polling settings (spec section 4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaConfig {
    pub poll_interval_secs: u64,
    /// Bounded 30s - 2h; invalid values fall back to 30 minutes.
    pub push_fallback_interval_secs: u64,
    pub polling_only: bool,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30 * 60,
            push_fallback_interval_secs: 30 * 60,
            polling_only: false,
        }
    }
}

impl DeltaConfig {
    #[must_use]
    pub fn effective_push_fallback_interval(&self) -> Duration {
        const MIN_SECS: u64 = 30;
        const MAX_SECS: u64 = 2 * 3600;
        let secs = if (MIN_SECS..=MAX_SECS).contains(&self.push_fallback_interval_secs) {
            self.push_fallback_interval_secs
        } else {
            30 * 60
        };
        Duration::from_secs(secs)
    }
}

/// Per-call and per-shutdown-phase timeouts (spec section 5,
/// "Cancellation & timeouts"). All values must satisfy `1s <= t <= 5min`;
/// [`Config::validate`] rejects configurations that don't.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub metadata_request_secs: u64,
    pub content_stats_secs: u64,
    pub network_callback_shutdown_secs: u64,
    pub download_worker_shutdown_secs: u64,
    pub upload_graceful_shutdown_secs: u64,
    pub filesystem_shutdown_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            metadata_request_secs: 30,
            content_stats_secs: 5,
            network_callback_shutdown_secs: 5,
            download_worker_shutdown_secs: 5,
            upload_graceful_shutdown_secs: 30,
            filesystem_shutdown_secs: 10,
        }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Raises verbosity further; mirrors the `ONEMOUNT_DEBUG` env toggle.
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"timeouts.metadata_request_secs"`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 5 * 60;

impl Config {
    /// Loads configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Tries to load from `path`; falls back to [`Config::default`] on any
    /// error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("onemount")
            .join("config.yaml")
    }

    /// Validates the configuration, in particular the timeout bounds
    /// named in spec section 5 ("Configured timeouts must satisfy
    /// `1s <= t <= 5min`; violations abort startup").
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let timeout_fields: [(&str, u64); 6] = [
            ("timeouts.metadata_request_secs", self.timeouts.metadata_request_secs),
            ("timeouts.content_stats_secs", self.timeouts.content_stats_secs),
            (
                "timeouts.network_callback_shutdown_secs",
                self.timeouts.network_callback_shutdown_secs,
            ),
            (
                "timeouts.download_worker_shutdown_secs",
                self.timeouts.download_worker_shutdown_secs,
            ),
            (
                "timeouts.upload_graceful_shutdown_secs",
                self.timeouts.upload_graceful_shutdown_secs,
            ),
            (
                "timeouts.filesystem_shutdown_secs",
                self.timeouts.filesystem_shutdown_secs,
            ),
        ];
        for (field, value) in timeout_fields {
            if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&value) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!(
                        "must satisfy {MIN_TIMEOUT_SECS}s <= t <= {MAX_TIMEOUT_SECS}s, got {value}s"
                    ),
                });
            }
        }

        if self.download.worker_count == 0 {
            errors.push(ValidationError {
                field: "download.worker_count".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.upload.max_in_flight == 0 {
            errors.push(ValidationError {
                field: "upload.max_in_flight".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.upload.chunk_size_bytes == 0 {
            errors.push(ValidationError {
                field: "upload.chunk_size_bytes".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_passes_validation() {
        let cfg = Config::default();
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn default_timeouts_match_spec() {
        let t = TimeoutsConfig::default();
        assert_eq!(t.metadata_request_secs, 30);
        assert_eq!(t.content_stats_secs, 5);
        assert_eq!(t.download_worker_shutdown_secs, 5);
        assert_eq!(t.upload_graceful_shutdown_secs, 30);
        assert_eq!(t.filesystem_shutdown_secs, 10);
    }

    #[test]
    fn validate_catches_out_of_bounds_timeout() {
        let mut cfg = Config::default();
        cfg.timeouts.metadata_request_secs = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "timeouts.metadata_request_secs"));

        let mut cfg = Config::default();
        cfg.timeouts.metadata_request_secs = 600;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "timeouts.metadata_request_secs"));
    }

    #[test]
    fn validate_catches_zero_worker_counts() {
        let mut cfg = Config::default();
        cfg.download.worker_count = 0;
        cfg.upload.max_in_flight = 0;
        let errors = cfg.validate();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"download.worker_count"));
        assert!(fields.contains(&"upload.max_in_flight"));
    }

    #[test]
    fn invalid_cleanup_interval_falls_back_to_24h() {
        let mut cache = CacheConfig { cleanup_interval_hours: 0, ..Default::default() };
        assert_eq!(cache.effective_cleanup_interval(), Duration::from_secs(24 * 3600));

        cache.cleanup_interval_hours = 9999;
        assert_eq!(cache.effective_cleanup_interval(), Duration::from_secs(24 * 3600));

        cache.cleanup_interval_hours = 48;
        assert_eq!(cache.effective_cleanup_interval(), Duration::from_secs(48 * 3600));
    }

    #[test]
    fn invalid_expiration_days_falls_back_to_30() {
        let mut cache = CacheConfig { expiration_days: 0, ..Default::default() };
        assert_eq!(cache.effective_expiration(), chrono::Duration::days(30));

        cache.expiration_days = 999;
        assert_eq!(cache.effective_expiration(), chrono::Duration::days(30));

        cache.expiration_days = 7;
        assert_eq!(cache.effective_expiration(), chrono::Duration::days(7));
    }

    #[test]
    fn invalid_push_fallback_interval_falls_back_to_30min() {
        let mut delta = DeltaConfig { push_fallback_interval_secs: 1, ..Default::default() };
        assert_eq!(delta.effective_push_fallback_interval(), Duration::from_secs(30 * 60));

        delta.push_fallback_interval_secs = 3600 * 10;
        assert_eq!(delta.effective_push_fallback_interval(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
mount:
  mount_point: /mnt/onedrive
  cache_dir: /var/cache/onemount
  headless_auth: true
cache:
  max_cache_size_bytes: 1073741824
  expiration_days: 14
  cleanup_interval_hours: 12
download:
  worker_count: 8
  chunk_size_bytes: 2097152
  max_recovery_attempts: 3
  worker_shutdown_secs: 5
upload:
  max_in_flight: 4
  small_file_threshold_bytes: 4194304
  chunk_size_bytes: 10485760
  max_attempts: 5
  max_resume_attempts: 3
  graceful_shutdown_secs: 30
delta:
  poll_interval_secs: 900
  push_fallback_interval_secs: 600
  polling_only: false
timeouts:
  metadata_request_secs: 30
  content_stats_secs: 5
  network_callback_shutdown_secs: 5
  download_worker_shutdown_secs: 5
  upload_graceful_shutdown_secs: 30
  filesystem_shutdown_secs: 10
logging:
  level: debug
  debug: true
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.mount.mount_point, PathBuf::from("/mnt/onedrive"));
        assert_eq!(cfg.cache.expiration_days, 14);
        assert_eq!(cfg.download.worker_count, 8);
        assert_eq!(cfg.upload.max_in_flight, 4);
        assert_eq!(cfg.delta.poll_interval_secs, 900);
        assert!(cfg.logging.debug);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.download.worker_count, 4);
    }

    #[test]
    fn default_path_ends_with_config_yaml() {
        assert!(Config::default_path().ends_with("onemount/config.yaml"));
    }
}
