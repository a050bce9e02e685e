// storefront/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_KHALTI_BASE_URL: &str = "https://khalti.com/api/v2/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Pretty,
  Json,
}

#[derive(Debug)]
pub struct KhaltiConfig {
  pub secret_key: SecretString,
  pub base_url: String,
  pub timeout: Duration,
}

#[derive(Debug)]
pub struct SmtpConfig {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: SecretString,
  /// Sender address. The SMTP account doubles as the sender.
  pub from_address: String,
}

/// Shared through `Arc`; secrets are not cloned around.
#[derive(Debug)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// `None` runs on the in-memory store.
  pub database_url: Option<String>,
  pub database_max_connections: u32,
  pub khalti: KhaltiConfig,
  pub client_url: String,
  pub capture_claim_ttl: Duration,
  pub smtp: Option<SmtpConfig>,
  pub admin_email: Option<String>,
  pub shop_name: String,
  pub log_format: LogFormat,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var_name: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match lookup(var_name) {
    Some(raw) => raw
      .trim()
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {}: {}", var_name, e))),
    None => Ok(default),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present
    let config = Self::from_lookup(|name| env::var(name).ok())?;
    tracing::info!(
      server_host = %config.server_host,
      server_port = config.server_port,
      database = config.database_url.is_some(),
      smtp = config.smtp.is_some(),
      "Application configuration loaded successfully."
    );
    Ok(config)
  }

  /// Builds the configuration from any variable source. Blank values count as unset.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let lookup = move |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let required = |name: &str| {
      lookup(name).ok_or_else(|| AppError::Config(format!("Missing environment variable '{}'", name)))
    };

    let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let server_port = parse_or(&lookup, "SERVER_PORT", 5001u16)?;
    let database_url = lookup("DATABASE_URL");
    let database_max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;

    let khalti = KhaltiConfig {
      secret_key: SecretString::from(required("KHALTI_SECRET_KEY")?),
      base_url: lookup("KHALTI_BASE_URL").unwrap_or_else(|| DEFAULT_KHALTI_BASE_URL.to_string()),
      timeout: Duration::from_secs(parse_or(&lookup, "KHALTI_TIMEOUT_SECS", 15u64)?),
    };
    if khalti.timeout.is_zero() {
      return Err(AppError::Config("KHALTI_TIMEOUT_SECS must be positive".to_string()));
    }

    let client_url = required("CLIENT_URL")?.trim_end_matches('/').to_string();
    let capture_claim_ttl = Duration::from_secs(parse_or(&lookup, "CAPTURE_CLAIM_TTL_SECS", 120u64)?);

    let smtp = match lookup("SMTP_HOST") {
      Some(host) => {
        let username = required("SMTP_USER")?;
        Some(SmtpConfig {
          host,
          port: parse_or(&lookup, "SMTP_PORT", 587u16)?,
          password: SecretString::from(required("SMTP_PASS")?),
          from_address: username.clone(),
          username,
        })
      }
      None => None,
    };

    let log_format = match lookup("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
      None | Some("pretty") => LogFormat::Pretty,
      Some("json") => LogFormat::Json,
      Some(other) => return Err(AppError::Config(format!("Invalid LOG_FORMAT: {}", other))),
    };

    Ok(Self {
      server_host,
      server_port,
      database_url,
      database_max_connections,
      khalti,
      client_url,
      capture_claim_ttl,
      smtp,
      admin_email: lookup("ADMIN_EMAIL"),
      shop_name: lookup("SHOP_NAME").unwrap_or_else(|| "KatmanduShop".to_string()),
      log_format,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use secrecy::ExposeSecret;
  use std::collections::HashMap;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name: &str| vars.get(name).cloned()
  }

  #[test]
  fn defaults_apply_when_only_required_values_are_set() {
    let config = AppConfig::from_lookup(lookup_from(&[
      ("KHALTI_SECRET_KEY", "test_secret"),
      ("CLIENT_URL", "http://localhost:5173/"),
    ]))
    .unwrap();

    assert_eq!(config.server_host, "127.0.0.1");
    assert_eq!(config.server_port, 5001);
    assert!(config.database_url.is_none());
    assert_eq!(config.khalti.base_url, DEFAULT_KHALTI_BASE_URL);
    assert_eq!(config.khalti.timeout, Duration::from_secs(15));
    assert_eq!(config.khalti.secret_key.expose_secret(), "test_secret");
    assert_eq!(config.client_url, "http://localhost:5173");
    assert_eq!(config.capture_claim_ttl, Duration::from_secs(120));
    assert!(config.smtp.is_none());
    assert_eq!(config.shop_name, "KatmanduShop");
    assert_eq!(config.log_format, LogFormat::Pretty);
  }

  #[test]
  fn missing_secret_key_is_a_configuration_error() {
    let err = AppConfig::from_lookup(lookup_from(&[("CLIENT_URL", "http://localhost")])).unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("KHALTI_SECRET_KEY")));

    let blank = AppConfig::from_lookup(lookup_from(&[("KHALTI_SECRET_KEY", "  "), ("CLIENT_URL", "http://x")]));
    assert!(blank.is_err());
  }

  #[test]
  fn smtp_requires_credentials_once_host_is_set() {
    let base = [
      ("KHALTI_SECRET_KEY", "k"),
      ("CLIENT_URL", "http://x"),
      ("SMTP_HOST", "smtp.example.com"),
    ];
    assert!(AppConfig::from_lookup(lookup_from(&base)).is_err());

    let mut full = base.to_vec();
    full.extend([("SMTP_USER", "shop@example.com"), ("SMTP_PASS", "pw"), ("LOG_FORMAT", "JSON")]);
    let config = AppConfig::from_lookup(lookup_from(&full)).unwrap();
    let smtp = config.smtp.unwrap();
    assert_eq!(smtp.port, 587);
    assert_eq!(smtp.from_address, "shop@example.com");
    assert_eq!(config.log_format, LogFormat::Json);
  }

  #[test]
  fn malformed_numbers_are_rejected() {
    let err = AppConfig::from_lookup(lookup_from(&[
      ("KHALTI_SECRET_KEY", "k"),
      ("CLIENT_URL", "http://x"),
      ("SERVER_PORT", "eighty"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("SERVER_PORT"));
  }
}
