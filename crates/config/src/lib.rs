//! Configuration module for the queue server.

use serde::Deserialize;
use std::env;
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to read {0} from {1}: {2}")]
    SecretFile(String, String, std::io::Error),
}

/// Application configuration loaded from environment variables.
///
/// Secrets can be supplied indirectly through `*_FILE` variables pointing at
/// files whose trimmed contents become the value.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// OIDC issuer URL (discovery document lives at
    /// `<issuer>/.well-known/openid-configuration`)
    pub oidc_issuer_url: String,
    /// OAuth2 client ID
    pub oauth2_client_id: String,
    /// OAuth2 client secret
    pub oauth2_client_secret: String,
    /// OAuth2 redirect URI
    pub oauth2_redirect_uri: String,
    /// Whether to send a PKCE challenge with the authorization request
    pub use_pkce: bool,
    /// Email domain permitted to log in; empty accepts any domain
    pub valid_domain: String,
    /// OIDC groups whose members are site admins
    pub site_admin_groups: Vec<String>,
    /// Key for signing session cookies
    pub session_key: Vec<u8>,
    /// Public base URL of the deployment (post-login redirect target)
    pub base_url: String,
    /// Mark cookies `Secure`
    pub secure_cookies: bool,
    /// Address to bind the server to
    pub bind_address: String,
    /// Production mode: requires a trusted proxy setting `X-Forwarded-For`
    pub production: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let db_url = env_var("OHQ_DB_URL")?;
        let db_user = env_var_or("OHQ_DB_USER", "");
        let db_password = secret_var_or("OHQ_DB_PASSWORD", "")?;

        Ok(Self {
            database_url: compose_database_url(&db_url, &db_user, &db_password),
            oidc_issuer_url: env_var_or("OHQ_OIDC_ISSUER_URL", ""),
            oauth2_client_id: env_var_or("OHQ_OAUTH2_CLIENT_ID", ""),
            oauth2_client_secret: secret_var_or("OHQ_OAUTH2_CLIENT_SECRET", "")?,
            oauth2_redirect_uri: env_var_or("OHQ_OAUTH2_REDIRECT_URI", ""),
            use_pkce: bool_var("OHQ_USE_PKCE", false)?,
            valid_domain: env_var_or("OHQ_VALID_DOMAIN", ""),
            site_admin_groups: list_var("OHQ_SITE_ADMIN_GROUPS"),
            session_key: secret_var("OHQ_SESSION_KEY")?.into_bytes(),
            base_url: env_var_or("OHQ_BASE_URL", "http://localhost:8080"),
            secure_cookies: bool_var("OHQ_SECURE_COOKIES", false)?,
            bind_address: env_var_or("OHQ_BIND_ADDRESS", "0.0.0.0:8080"),
            production: bool_var("OHQ_PRODUCTION", false)?,
        })
    }
}

/// Splice credentials into a `postgres://` URL when they are configured
/// separately from it.
fn compose_database_url(url: &str, user: &str, password: &str) -> String {
    if user.is_empty() {
        return url.to_string();
    }
    let credentials = if password.is_empty() {
        user.to_string()
    } else {
        format!("{user}:{password}")
    };
    match url.split_once("://") {
        Some((scheme, rest)) => format!("{scheme}://{credentials}@{rest}"),
        None => url.to_string(),
    }
}

fn env_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn env_var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Resolve `NAME` either directly or through a `NAME_FILE` indirection.
fn secret_var(name: &str) -> Result<String, ConfigError> {
    let file_var = format!("{name}_FILE");
    if let Ok(path) = env::var(&file_var) {
        let contents = fs::read_to_string(&path)
            .map_err(|e| ConfigError::SecretFile(file_var, path, e))?;
        return Ok(contents.trim().to_string());
    }
    env_var(name)
}

fn secret_var_or(name: &str, default: &str) -> Result<String, ConfigError> {
    match secret_var(name) {
        Ok(v) => Ok(v),
        Err(ConfigError::MissingVar(_)) => Ok(default.to_string()),
        Err(e) => Err(e),
    }
}

fn bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .parse::<bool>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), v)),
        Err(_) => Ok(default),
    }
}

fn list_var(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_or_uses_default() {
        let val = env_var_or("OHQ_NON_EXISTENT_VAR_12345", "default_value");
        assert_eq!(val, "default_value");
    }

    #[test]
    fn database_url_credential_splice() {
        assert_eq!(
            compose_database_url("postgres://db:5432/queue", "svc", "hunter2"),
            "postgres://svc:hunter2@db:5432/queue"
        );
        assert_eq!(
            compose_database_url("postgres://db/queue", "svc", ""),
            "postgres://svc@db/queue"
        );
        assert_eq!(
            compose_database_url("postgres://full@db/queue", "", "ignored"),
            "postgres://full@db/queue"
        );
    }

    #[test]
    fn list_var_splits_and_trims() {
        // SAFETY: test-local variable name, not read elsewhere.
        unsafe { env::set_var("OHQ_TEST_LIST_VAR", "staff, admins ,,ops") };
        assert_eq!(list_var("OHQ_TEST_LIST_VAR"), vec!["staff", "admins", "ops"]);
        unsafe { env::remove_var("OHQ_TEST_LIST_VAR") };
    }
}
