//! Process configuration, read from the environment.
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `DATABASE_URL_PRODUCTION` / `DATABASE_URL` | one of them | |
//! | `SMTP_HOST` | yes | |
//! | `SMTP_PORT` | no | `587` |
//! | `SMTP_SECURITY` | no | `starttls` (`tls`, `none`) |
//! | `SMTP_USERNAME` + `SMTP_PASSWORD` | no, but both or neither | |
//! | `MAIL_FROM` | yes | |
//! | `APP_BASE_URL` | no | |
//!
//! Blank values count as unset.

/// Default submission port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// How the SMTP connection is secured.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS
    #[default]
    StartTls,
    /// Implicit TLS (usually port 465)
    Tls,
    /// Unencrypted; local relays and test servers only
    None,
}

impl core::str::FromStr for SmtpSecurity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starttls" => Ok(SmtpSecurity::StartTls),
            "tls" | "ssl" => Ok(SmtpSecurity::Tls),
            "none" | "plain" => Ok(SmtpSecurity::None),
            other => Err(ConfigError::Invalid {
                name: "SMTP_SECURITY",
                reason: format!("expected starttls, tls or none, got {other:?}"),
            }),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    /// Username and password
    pub credentials: Option<(String, String)>,
}

impl core::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field(
                "username",
                &self.credentials.as_ref().map(|(username, _)| username),
            )
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub smtp: SmtpConfig,
    pub mail_from: String,
    pub base_url: Option<String>,
}

impl core::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"<redacted>")
            .field("smtp", &self.smtp)
            .field("mail_from", &self.mail_from)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`. The database URL is resolved first,
    /// so a missing database is always the reported error when several are missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL_PRODUCTION")
            .or_else(|| get("DATABASE_URL"))
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let host = get("SMTP_HOST").ok_or(ConfigError::Missing("SMTP_HOST"))?;
        let port = match get("SMTP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "SMTP_PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_SMTP_PORT,
        };
        let security = match get("SMTP_SECURITY") {
            Some(raw) => raw.parse()?,
            None => SmtpSecurity::default(),
        };
        let credentials = match (get("SMTP_USERNAME"), get("SMTP_PASSWORD")) {
            (Some(username), Some(password)) => Some((username, password)),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SMTP_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("SMTP_USERNAME")),
        };

        let mail_from = get("MAIL_FROM").ok_or(ConfigError::Missing("MAIL_FROM"))?;
        let base_url = get("APP_BASE_URL");

        Ok(Self {
            database_url,
            smtp: SmtpConfig {
                host,
                port,
                security,
                credentials,
            },
            mail_from,
            base_url,
        })
    }
}
