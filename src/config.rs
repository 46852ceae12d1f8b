use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use thiserror::Error;

use crate::grading::scoring::DEFAULT_MAX_SCORE;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} missing")]
    Missing(&'static str),
    #[error("{0} is invalid: {1}")]
    Invalid(&'static str, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_key: Vec<u8>,
    pub db_max_connections: u32,
    pub admin_private_override: bool,
    pub default_max_score: f64,
    pub reminder_cron: String,
    /// Adds `Secure` to the session cookie.
    pub secure_cookies: bool,
    pub seed_admin: Option<SeedAdmin>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SeedAdmin {
    pub email: String,
    pub code: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL")
            .ok_or(ConfigError::Missing("DATABASE_URL"))?
            .to_string();

        let session_key_b64 = get("SESSION_KEY").ok_or(ConfigError::Missing("SESSION_KEY"))?;
        let session_key = general_purpose::STANDARD
            .decode(session_key_b64)
            .map_err(|_| ConfigError::Invalid("SESSION_KEY", "must be base64".to_string()))?;
        if session_key.len() < 32 {
            return Err(ConfigError::Invalid(
                "SESSION_KEY",
                "must decode to at least 32 bytes".to_string(),
            ));
        }

        let bind_addr = match get("BIND_ADDR") {
            Some(addr) => addr.to_string(),
            None => format!("0.0.0.0:{}", get("PORT").unwrap_or("3000")),
        };

        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::Invalid("DB_MAX_CONNECTIONS", raw.to_string()))?,
            None => 10,
        };

        let admin_private_override = match get("ADMIN_PRIVATE_OVERRIDE") {
            Some(raw) => parse_bool(raw)
                .ok_or_else(|| ConfigError::Invalid("ADMIN_PRIVATE_OVERRIDE", raw.to_string()))?,
            None => false,
        };

        let default_max_score = match get("DEFAULT_MAX_SCORE") {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v > 0.0)
                .ok_or_else(|| ConfigError::Invalid("DEFAULT_MAX_SCORE", raw.to_string()))?,
            None => DEFAULT_MAX_SCORE,
        };

        let secure_cookies = match get("PRODUCTION") {
            Some(raw) => parse_bool(raw).unwrap_or(true),
            None => false,
        };

        let seed_admin = match (get("SEED_ADMIN_EMAIL"), get("SEED_ADMIN_CODE")) {
            (Some(email), Some(code)) => Some(SeedAdmin {
                email: email.to_lowercase(),
                code: code.to_string(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "SEED_ADMIN_EMAIL",
                    "SEED_ADMIN_EMAIL and SEED_ADMIN_CODE must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_key,
            db_max_connections,
            admin_private_override,
            default_max_score,
            reminder_cron: get("REMINDER_CRON").unwrap_or("0 * * * * *").to_string(),
            secure_cookies,
            seed_admin,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("DATABASE_URL".to_string(), "postgres://localhost/school".to_string());
        vars.insert(
            "SESSION_KEY".to_string(),
            general_purpose::STANDARD.encode([7u8; 32]),
        );
        vars
    }

    #[test]
    fn defaults() {
        let config = Config::from_vars(&base()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.db_max_connections, 10);
        assert!(!config.admin_private_override);
        assert_eq!(config.default_max_score, 100.0);
        assert_eq!(config.reminder_cron, "0 * * * * *");
        assert!(config.seed_admin.is_none());
        assert!(!config.secure_cookies);
    }

    #[test]
    fn port_and_overrides() {
        let mut vars = base();
        vars.insert("PORT".to_string(), "8080".to_string());
        vars.insert("ADMIN_PRIVATE_OVERRIDE".to_string(), "yes".to_string());
        vars.insert("DEFAULT_MAX_SCORE".to_string(), "10".to_string());
        vars.insert("SEED_ADMIN_EMAIL".to_string(), "Admin@School.org".to_string());
        vars.insert("SEED_ADMIN_CODE".to_string(), "123456".to_string());
        vars.insert("PRODUCTION".to_string(), "1".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.secure_cookies);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(config.admin_private_override);
        assert_eq!(config.default_max_score, 10.0);
        assert_eq!(config.seed_admin.unwrap().email, "admin@school.org");
    }

    #[test]
    fn missing_and_invalid_values() {
        let mut vars = base();
        vars.remove("DATABASE_URL");
        assert_eq!(Config::from_vars(&vars).unwrap_err(), ConfigError::Missing("DATABASE_URL"));

        let mut vars = base();
        vars.insert("SESSION_KEY".to_string(), general_purpose::STANDARD.encode([1u8; 8]));
        assert!(matches!(Config::from_vars(&vars), Err(ConfigError::Invalid("SESSION_KEY", _))));

        let mut vars = base();
        vars.insert("DEFAULT_MAX_SCORE".to_string(), "-1".to_string());
        assert!(Config::from_vars(&vars).is_err());

        let mut vars = base();
        vars.insert("SEED_ADMIN_EMAIL".to_string(), "a@b.c".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }
}
