//! Connection settings from the environment
//!
//! `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD` and `DB_SSL`
//! describe a Postgres server. A `DATABASE_URL` takes precedence and may
//! also point at a SQLite file.

use config::{Config, Environment};
use folio_core::errors::{ExError, ExErrorKind};
use folio_core_types::Sensitive;
use folio_store::{PgSettings, StoreTarget};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid connection settings: {0}")]
    Invalid(#[from] config::ConfigError),

    #[error("invalid DATABASE_URL: {0}")]
    Url(String),
}

impl From<ConfigError> for ExError {
    fn from(err: ConfigError) -> Self {
        ExError::new(ExErrorKind::Config)
            .with_op("load_config")
            .with_message(err.to_string())
    }
}

/// Raw `DB_*` variables, lowercased and stripped of the prefix
#[derive(Debug, Default, Deserialize)]
struct DbEnv {
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    ssl: Option<bool>,
}

/// Resolve the store target from the process environment
pub fn load_target(database_url: Option<&str>) -> Result<StoreTarget, ConfigError> {
    resolve(database_url, None)
}

/// Resolve against an explicit variable map instead of the process environment
fn resolve(
    database_url: Option<&str>,
    vars: Option<HashMap<String, String>>,
) -> Result<StoreTarget, ConfigError> {
    if let Some(url) = database_url.filter(|u| !u.trim().is_empty()) {
        return StoreTarget::from_url(url.trim())
            .map_err(|e| ConfigError::Url(e.message().to_string()));
    }

    // Values stay strings here; only `port` and `ssl` are converted, by their field types
    let settings = Config::builder()
        .add_source(Environment::with_prefix("DB").source(vars))
        .build()?;
    let env: DbEnv = settings.try_deserialize()?;

    let database = env
        .name
        .filter(|n| !n.is_empty())
        .ok_or(ConfigError::Missing("DB_NAME"))?;

    Ok(StoreTarget::Postgres(PgSettings {
        host: env.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env.port.unwrap_or(DEFAULT_PORT),
        database,
        user: env.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
        password: env.password.filter(|p| !p.is_empty()).map(Sensitive::new),
        ssl: env.ssl.unwrap_or(false),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_fill_everything_but_the_name() {
        let target = resolve(None, vars(&[("DB_NAME", "portfolio")])).unwrap();
        assert_eq!(
            target,
            StoreTarget::Postgres(PgSettings {
                host: "localhost".into(),
                port: 5432,
                database: "portfolio".into(),
                user: "postgres".into(),
                password: None,
                ssl: false,
            })
        );
    }

    #[test]
    fn test_all_variables_parsed() {
        let target = resolve(
            None,
            vars(&[
                ("DB_HOST", "db.internal"),
                ("DB_PORT", "6543"),
                ("DB_NAME", "portfolio"),
                ("DB_USER", "admin"),
                ("DB_PASSWORD", "hunter2"),
                ("DB_SSL", "true"),
            ]),
        )
        .unwrap();

        let StoreTarget::Postgres(settings) = target else {
            panic!("expected postgres settings");
        };
        assert_eq!(settings.host, "db.internal");
        assert_eq!(settings.port, 6543);
        assert_eq!(settings.user, "admin");
        assert_eq!(settings.password.as_ref().map(|p| p.expose().as_str()), Some("hunter2"));
        assert!(settings.ssl);
    }

    #[test]
    fn test_numeric_looking_values_stay_strings() {
        let target = resolve(
            None,
            vars(&[
                ("DB_NAME", "0042"),
                ("DB_USER", "1.50"),
                ("DB_PASSWORD", "007"),
                ("DB_HOST", "10"),
            ]),
        )
        .unwrap();

        let StoreTarget::Postgres(settings) = target else {
            panic!("expected postgres settings");
        };
        assert_eq!(settings.database, "0042");
        assert_eq!(settings.user, "1.50");
        assert_eq!(settings.host, "10");
        assert_eq!(settings.password.as_ref().map(|p| p.expose().as_str()), Some("007"));
    }

    #[test]
    fn test_boolean_looking_password_stays_a_string() {
        let target = resolve(
            None,
            vars(&[("DB_NAME", "portfolio"), ("DB_PASSWORD", "true")]),
        )
        .unwrap();

        let StoreTarget::Postgres(settings) = target else {
            panic!("expected postgres settings");
        };
        assert_eq!(settings.password.as_ref().map(|p| p.expose().as_str()), Some("true"));
        assert!(!settings.ssl);
    }

    #[test]
    fn test_missing_name_is_reported() {
        let err = resolve(None, vars(&[("DB_HOST", "db.internal")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DB_NAME")));
        assert_eq!(ExError::from(err).kind(), ExErrorKind::Config);
    }

    #[test]
    fn test_bad_port_is_invalid() {
        let err = resolve(None, vars(&[("DB_NAME", "portfolio"), ("DB_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_database_url_wins() {
        let target = resolve(
            Some("sqlite://local/folio.db"),
            vars(&[("DB_NAME", "portfolio")]),
        )
        .unwrap();
        assert_eq!(target, StoreTarget::Sqlite(PathBuf::from("local/folio.db")));
    }

    #[test]
    fn test_unsupported_url_scheme() {
        let err = resolve(Some("mysql://db/portfolio"), None).unwrap_err();
        assert!(matches!(err, ConfigError::Url(_)));
    }
}
