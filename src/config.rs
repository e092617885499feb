use std::env;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {name} has invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

/// Runtime configuration, read once from the environment at startup.
/// Optional channels/roles simply disable the feature that needs them.
#[derive(Debug)]
pub struct BotConfig {
    pub token: String,
    pub welcome_channel: Option<u64>,
    pub goodbye_channel: Option<u64>,
    pub action_log_channel: Option<u64>,
    pub admin_role: Option<u64>,
    pub data_dir: PathBuf,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = env::var("DISCORD_TOKEN").map_err(|_| ConfigError::Missing("DISCORD_TOKEN"))?;

        Ok(BotConfig {
            token,
            welcome_channel: optional_id("WELCOME_CHANNEL_ID")?,
            goodbye_channel: optional_id("GOODBYE_CHANNEL_ID")?,
            action_log_channel: optional_id("ACTION_LOG_CHANNEL_ID")?,
            admin_role: optional_id("ADMIN_ROLE_ID")?,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
        })
    }
}

fn optional_id(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_id(name, &value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_id(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn ids_parse_with_surrounding_whitespace() {
        assert_eq!(parse_id("X", " 123 ").unwrap(), 123);
    }

    #[test]
    fn malformed_ids_are_rejected_with_the_variable_name() {
        assert_matches!(
            parse_id("WELCOME_CHANNEL_ID", "abc"),
            Err(ConfigError::Invalid { name: "WELCOME_CHANNEL_ID", .. })
        );
    }
}
