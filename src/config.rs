use std::str::FromStr;

use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::sqlite::SqliteConnectOptions;

use crate::domain::fields::UserId;

#[derive(Deserialize, Clone)]
pub struct Config {
    pub application: ApplicationConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub bot: BotConfig,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub debug_mode: String,
}

#[derive(Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn get_connect_options(&self) -> Result<SqliteConnectOptions, sqlx::Error> {
        Ok(SqliteConnectOptions::from_str(&self.url)?.create_if_missing(true))
    }
}

#[derive(Deserialize, Clone)]
pub struct JwtConfig {
    pub secret: Secret<String>,
    pub iss: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub exp: u64,
}

#[derive(Deserialize, Clone)]
pub struct BotConfig {
    /// Bot handle used in referral links, without the leading `@`.
    pub username: String,
    /// Key the platform adapter exchanges for a bearer token.
    pub api_key: Secret<String>,
    #[serde(default)]
    pub operator_ids: Vec<i64>,
    #[serde(default)]
    pub channels: Vec<String>,
    /// Seconds to wait for the adapter to report on a delivery.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub delivery_timeout: u64,
}

impl BotConfig {
    pub fn is_operator(&self, user_id: UserId) -> bool {
        self.operator_ids.contains(&user_id.inner())
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_config() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(e.to_string()))?;
    let config_dir = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_file = format!("{}.yaml", environment.as_str());

    config::Config::builder()
        .add_source(config::File::from(config_dir.join("base.yaml")))
        .add_source(config::File::from(config_dir.join(environment_file)).required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_case_insensitively() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn sqlite_url_is_accepted() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
        };
        assert!(config.get_connect_options().is_ok());
    }
}
