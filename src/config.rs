// src/config.rs
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::Domain;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/agworld.toml";
pub const ENV_CONFIG_PATH: &str = "AGWORLD_CONFIG_PATH";

/// Whole-process configuration. Every section has working defaults so an
/// empty TOML file (or none at all) boots the service in fallback mode.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub source: SourceConfig,
    pub email: EmailConfig,
    pub report: ReportConfig,
    pub schedule: ScheduleConfig,
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            source: SourceConfig::default(),
            email: EmailConfig::default(),
            report: ReportConfig::default(),
            schedule: ScheduleConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub redis_url: String,
    pub connect_timeout_secs: u64,
    /// TTL of the per-domain processed batch (`agworld:<collection>:latest`).
    pub batch_ttl_secs: u64,
    /// TTL of `processed:<collection>:<hash>` dedup entries.
    pub record_ttl_secs: u64,
    pub report_meta_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            connect_timeout_secs: 2,
            batch_ttl_secs: 3600,
            record_ttl_secs: 3600,
            report_meta_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_key: String,
    pub min_request_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub live_ttl_secs: u64,
    /// Activities change more often than the rest.
    pub activity_ttl_secs: u64,
    pub fallback_ttl_secs: u64,
    pub max_pages: u32,
    pub page_size: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://us.agworld.co/user_api/v1".to_string(),
            api_key: String::new(),
            min_request_interval_ms: 1000,
            request_timeout_secs: 30,
            live_ttl_secs: 3600,
            activity_ttl_secs: 1800,
            fallback_ttl_secs: 300,
            max_pages: 10,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    /// Defaults to `user` when empty.
    pub from: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            user: String::new(),
            pass: String::new(),
            from: String::new(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub recipients: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("agworld-reports"),
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Poll interval per collection name, in minutes. Domains missing here are not scheduled.
    pub intervals_min: BTreeMap<String, u64>,
    pub daily_report_cron: String,
    pub cleanup_cron: String,
    pub misfire_grace_secs: u64,
    pub coalesce: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let intervals_min = [
            ("fields", 60),
            ("activities", 30),
            ("crops", 120),
            ("companies", 1440),
            ("farms", 1440),
            ("seasons", 1440),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            intervals_min,
            daily_report_cron: "0 8 * * *".to_string(),
            cleanup_cron: "0 2 * * *".to_string(),
            misfire_grace_secs: 300,
            coalesce: true,
        }
    }
}

impl ScheduleConfig {
    pub fn interval_for(&self, domain: Domain) -> Option<Duration> {
        self.intervals_min
            .get(domain.collection())
            .filter(|m| **m > 0)
            .map(|m| Duration::from_secs(m * 60))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub poll_max_retries: u32,
    pub poll_delay_secs: u64,
    pub report_max_retries: u32,
    pub report_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            poll_max_retries: 3,
            poll_delay_secs: 60,
            report_max_retries: 2,
            report_delay_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load from an explicit TOML file, then apply env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg: AppConfig = toml::from_str(&content)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $AGWORLD_CONFIG_PATH
    /// 2) config/agworld.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(&p);
            if !pb.exists() {
                return Err(ConfigError::MissingPath(p));
            }
            return Self::load_from(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        let mut cfg = AppConfig::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_nonempty("REDIS_URL") {
            self.cache.redis_url = v;
        }
        if let Some(v) = env_nonempty("AGWORLD_API_KEY") {
            self.source.api_key = v;
        }
        if let Some(v) = env_nonempty("AGWORLD_API_BASE_URL") {
            self.source.base_url = v;
        }
        if let Some(v) = env_nonempty("EMAIL_HOST") {
            self.email.host = v;
        }
        if let Some(v) = env_nonempty("EMAIL_PORT") {
            self.email.port = v.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "EMAIL_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = env_nonempty("EMAIL_USER") {
            self.email.user = v;
        }
        if let Some(v) = env_nonempty("EMAIL_PASS") {
            self.email.pass = v;
        }
        if let Some(v) = env_nonempty("EMAIL_FROM") {
            self.email.from = v;
        }
        if let Some(v) = env_nonempty("REPORT_RECIPIENTS") {
            self.report.recipients = split_list(&v);
        }
        if let Some(v) = env_nonempty("REPORT_OUTPUT_DIR") {
            self.report.output_dir = PathBuf::from(v);
        }
        Ok(())
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    const ENV_VARS: [&str; 11] = [
        ENV_CONFIG_PATH,
        "REDIS_URL",
        "AGWORLD_API_KEY",
        "AGWORLD_API_BASE_URL",
        "EMAIL_HOST",
        "EMAIL_PORT",
        "EMAIL_USER",
        "EMAIL_PASS",
        "EMAIL_FROM",
        "REPORT_RECIPIENTS",
        "REPORT_OUTPUT_DIR",
    ];

    fn clear_env() {
        for v in ENV_VARS {
            env::remove_var(v);
        }
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [source]
            max_pages = 3

            [schedule.intervals_min]
            fields = 15
            "#,
        )
        .unwrap();
        assert_eq!(cfg.source.max_pages, 3);
        assert_eq!(cfg.source.fallback_ttl_secs, 300);
        assert_eq!(
            cfg.schedule.interval_for(Domain::Field),
            Some(Duration::from_secs(900))
        );
        // the explicit table replaces the default one
        assert_eq!(cfg.schedule.interval_for(Domain::Activity), None);
        assert_eq!(cfg.schedule.daily_report_cron, "0 8 * * *");
    }

    #[test]
    fn shipped_sample_matches_defaults_except_output_dir() {
        let mut cfg: AppConfig = toml::from_str(include_str!("../config/agworld.toml")).unwrap();
        assert_eq!(cfg.report.output_dir, PathBuf::from("reports"));
        cfg.report.output_dir = ReportConfig::default().output_dir;
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn recipients_list_is_trimmed() {
        assert_eq!(
            split_list(" a@x.io, ,b@y.io "),
            vec!["a@x.io".to_string(), "b@y.io".to_string()]
        );
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_path_then_overrides() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        // No files in temp CWD -> defaults
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg, AppConfig::default());

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[cache]\nbatch_ttl_secs = 10\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        env::set_var("REDIS_URL", "redis://cache:6379/1");
        env::set_var("REPORT_RECIPIENTS", "ops@farm.test");
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.cache.batch_ttl_secs, 10);
        assert_eq!(cfg.cache.redis_url, "redis://cache:6379/1");
        assert_eq!(cfg.report.recipients, vec!["ops@farm.test".to_string()]);

        env::set_var("EMAIL_PORT", "not-a-port");
        assert!(matches!(
            AppConfig::load_default(),
            Err(ConfigError::InvalidEnv { var: "EMAIL_PORT", .. })
        ));

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(matches!(
            AppConfig::load_default(),
            Err(ConfigError::MissingPath(_))
        ));

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
