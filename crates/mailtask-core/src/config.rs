//! MailTask configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MailTaskError, Result};

/// Environment variable that overrides `mail.password`.
pub const SMTP_PASSWORD_ENV: &str = "MAILTASK_SMTP_PASSWORD";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailTaskConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

impl MailTaskConfig {
    /// Load config from the default path (~/.mailtask/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MailTaskError::Config(format!("Failed to read config: {e}")))?;
        let config = Self::parse(&content)?;
        tracing::debug!("📄 Config loaded from {}", path.display());
        Ok(config)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MailTaskError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Apply environment overrides (secrets should not live in the file).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(password) = std::env::var(SMTP_PASSWORD_ENV)
            && !password.is_empty()
        {
            self.mail.password = password;
        }
        self
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.daemon.interval_secs == 0 {
            return Err(MailTaskError::Config(
                "daemon.interval_secs must be at least 1".into(),
            ));
        }
        if self.daemon.connection.trim().is_empty() {
            return Err(MailTaskError::Config("daemon.connection is empty".into()));
        }
        if !is_safe_prefix(&self.daemon.table_prefix) {
            return Err(MailTaskError::Config(format!(
                "daemon.table_prefix '{}' may only contain letters, digits, '_' and '.'",
                self.daemon.table_prefix
            )));
        }
        if self.mail.from_email.trim().is_empty() {
            return Err(MailTaskError::Config("mail.from_email is empty".into()));
        }
        if self.mail.port == 0 {
            return Err(MailTaskError::Config("mail.port must be non-zero".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the MailTask home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mailtask")
    }
}

/// Scheduling and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds to sleep between scheduling cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Store connection string: `sqlite://<path>` or `postgres://...`.
    #[serde(default = "default_connection")]
    pub connection: String,
    /// Prepended to every table name (a schema such as `reports.` or a plain prefix).
    #[serde(default)]
    pub table_prefix: String,
    /// Directory holding template stylesheets.
    #[serde(default = "default_styles_dir")]
    pub styles_dir: String,
}

fn default_interval_secs() -> u64 { 60 }
fn default_connection() -> String { "sqlite://~/.mailtask/mailtask.db".into() }
fn default_styles_dir() -> String { "~/.mailtask/styles".into() }

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            connection: default_connection(),
            table_prefix: String::new(),
            styles_dir: default_styles_dir(),
        }
    }
}

impl DaemonConfig {
    /// Styles directory with `~` expanded.
    pub fn styles_path(&self) -> PathBuf {
        expand_path(&self.styles_dir)
    }
}

/// SMTP transport and sender identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Require TLS (STARTTLS, or implicit TLS on port 465).
    #[serde(default)]
    pub enable_ssl: bool,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_host() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 25 }
fn default_from_email() -> String { "reports@localhost".into() }
fn default_from_name() -> String { "Mail Task Daemon".into() }
fn default_subject() -> String { "Reporte Automático".into() }
fn default_timeout_secs() -> u64 { 30 }

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            enable_ssl: false,
            from_email: default_from_email(),
            from_name: default_from_name(),
            subject: default_subject(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl MailConfig {
    /// Whether SMTP authentication is configured.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Table prefixes and procedure names end up inside SQL text.
pub fn is_safe_identifier(s: &str) -> bool {
    !s.is_empty() && is_safe_prefix(s)
}

fn is_safe_prefix(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
