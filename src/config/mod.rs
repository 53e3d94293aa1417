use crate::utils::error::{PortalError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

/// Request header carrying the upstream API key.
pub const PORTAL_API_HEADER: &str = "PORTAL-API";

/// Environment variable holding the upstream secret.
pub const PORTAL_API_KEY_VAR: &str = "PORTAL_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    pub base_url: String,

    #[serde(default = "default_institutions_path")]
    pub institutions_path: String,

    #[serde(default = "default_programs_path")]
    pub programs_path: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_proxy_retry_attempts")]
    pub proxy_retry_attempts: u32,

    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Upstream secret. Falls back to `PORTAL_API_KEY` when not set in the
    /// config file; when absent entirely, every upstream-dependent call
    /// degrades to an empty result instead of raising.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_institutions_path() -> String {
    "list-institutions".to_string()
}

fn default_programs_path() -> String {
    "list-programs-by-institution".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_proxy_retry_attempts() -> u32 {
    2
}

fn default_cache_ttl_seconds() -> u64 {
    600
}

impl PortalConfig {
    /// 以預設值建立配置，金鑰從環境變數讀取
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            institutions_path: default_institutions_path(),
            programs_path: default_programs_path(),
            timeout_seconds: default_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            proxy_retry_attempts: default_proxy_retry_attempts(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            api_key: api_key_from_env(),
        }
    }

    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(PortalError::IoError)?;
        Self::from_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content);

        let mut config: PortalConfig =
            toml::from_str(&processed_content).map_err(|e| PortalError::ConfigError {
                message: format!("Portal TOML parsing error: {}", e),
            })?;

        if config.api_key.as_deref().is_none_or(str::is_empty) {
            config.api_key = api_key_from_env();
        }

        Ok(config)
    }

    /// 替換環境變數，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn institutions_url(&self) -> String {
        join_url(&self.base_url, &self.institutions_path)
    }

    pub fn programs_url(&self) -> String {
        join_url(&self.base_url, &self.programs_path)
    }

    /// The configured secret, or `None` (with a one-time diagnostic) when
    /// the portal is effectively unreachable.
    pub fn api_key(&self) -> Option<&str> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(key),
            _ => {
                warn_missing_api_key();
                None
            }
        }
    }
}

impl Validate for PortalConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("base_url", &self.base_url)?;
        validation::validate_non_empty_string("institutions_path", &self.institutions_path)?;
        validation::validate_non_empty_string("programs_path", &self.programs_path)?;
        validation::validate_positive_number("timeout_seconds", self.timeout_seconds, 1)?;
        validation::validate_positive_number("cache_ttl_seconds", self.cache_ttl_seconds, 1)?;
        Ok(())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn api_key_from_env() -> Option<String> {
    std::env::var(PORTAL_API_KEY_VAR)
        .ok()
        .filter(|key| !key.is_empty())
}

pub(crate) fn warn_missing_api_key() {
    static WARNED: Once = Once::new();
    WARNED.call_once(|| {
        tracing::error!(
            "{} is not set; portal lookups will return empty results",
            PORTAL_API_KEY_VAR
        );
    });
}
