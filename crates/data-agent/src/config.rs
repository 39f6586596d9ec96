//! Settings of the CLI, read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use data_agent::core::DEFAULT_MAX_ITERATIONS;
use data_agent::core::tool::ExecutionMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug)]
pub struct Config {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub database: PathBuf,
    pub max_iterations: usize,
    pub output_dir: PathBuf,
    pub execution_mode: ExecutionMode,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv` first to pick up
    /// a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let required = |name| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let optional = |name| lookup(name).filter(|value| !value.is_empty());

        let max_iterations = match optional("DATA_AGENT_MAX_ITER") {
            Some(value) => parse("DATA_AGENT_MAX_ITER", value)?,
            None => DEFAULT_MAX_ITERATIONS,
        };
        let concurrent = match optional("DATA_AGENT_CONCURRENT_TOOLS") {
            Some(value) => parse_flag("DATA_AGENT_CONCURRENT_TOOLS", value)?,
            None => false,
        };

        Ok(Config {
            api_key: required("OPENAI_API_KEY")?,
            base_url: optional("OPENAI_BASE_URL"),
            model: optional("OPENAI_MODEL"),
            database: required("DATA_AGENT_DB")?.into(),
            max_iterations,
            output_dir: optional("DATA_AGENT_OUTPUT_DIR")
                .unwrap_or_else(|| "tmp".to_owned())
                .into(),
            execution_mode: if concurrent {
                ExecutionMode::Concurrent
            } else {
                ExecutionMode::Sequential
            },
        })
    }
}

fn parse<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        name,
        reason: err.to_string(),
        value,
    })
}

fn parse_flag(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}
