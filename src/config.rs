use std::{fs, path::Path, path::PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

const DEFAULT_BASE_URL: &str = "https://ll.thespacedevs.com/2.2.0";
const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub upstream: UpstreamConfig,
    pub mail: Option<MailConfig>,
    /// IANA zone used when rendering launch times in the digest.
    pub timezone: String,
    pub database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            mail: None,
            timezone: "UTC".to_string(),
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 100,
            max_pages: 5,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
            from: String::new(),
            to: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Reads and validates the config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            AppConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        if self.upstream.page_size == 0 {
            return Err(ConfigError::Invalid("upstream.page_size must be positive".into()));
        }
        if self.upstream.max_pages == 0 {
            return Err(ConfigError::Invalid("upstream.max_pages must be positive".into()));
        }
        if let Some(mail) = &self.mail {
            mail.validate()?;
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| ConfigError::Invalid(format!("timezone {:?}: {err}", self.timezone)))
    }
}

impl MailConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp_host.trim().is_empty() {
            return Err(ConfigError::Invalid("mail.smtp_host is required".into()));
        }
        if self.to.is_empty() {
            return Err(ConfigError::Invalid("mail.to needs at least one recipient".into()));
        }
        for address in std::iter::once(&self.from).chain(self.to.iter()) {
            address
                .parse::<lettre::message::Mailbox>()
                .map_err(|err| ConfigError::Invalid(format!("mail address {address:?}: {err}")))?;
        }
        Ok(())
    }
}
