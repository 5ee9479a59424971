//! Configuration
//!
//! - `ApiKeyOptions`: what the authentication engine reads (header, scheme, identity type).
//! - `Settings`: command line / environment for the `keygate` binary.
//! - Seed files: YAML (or JSON) lists of pre-issued keys loaded at startup.
//!
//! Environment variables:
//! - KEYGATE_HEADER_NAME (default: X-Api-Key)
//! - KEYGATE_SCHEME (default: ApiKey)
//! - KEYGATE_AUTHENTICATION_TYPE (default: ApiKey)
//! - KEYGATE_PROBLEM_TYPE_BASE (default: https://httpstatuses.com)
//! - KEYGATE_SEED_FILE (optional path)
//! - BIND_ADDR (default: 0.0.0.0:8088)

use crate::negotiate::ProblemSettings;
use crate::record::ApiKeyRecord;
use actix_web::http::header::HeaderName;
use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_HEADER_NAME: &str = "X-Api-Key";
pub const DEFAULT_SCHEME: &str = "ApiKey";
pub const DEFAULT_AUTHENTICATION_TYPE: &str = "ApiKey";
pub const DEFAULT_PROBLEM_TYPE_BASE: &str = "https://httpstatuses.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid header name: {0:?}")]
    InvalidHeaderName(String),
    #[error("Invalid option: {0}")]
    Invalid(String),
    #[error("Seed file error: {0}")]
    Seed(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Options consumed by the authentication engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyOptions {
    /// Request header carrying the key.
    pub header_name: String,
    /// Scheme name stamped on issued tickets.
    pub scheme: String,
    /// Authentication type of the identity built for a matched key.
    pub authentication_type: String,
}

impl Default for ApiKeyOptions {
    fn default() -> Self {
        Self {
            header_name: DEFAULT_HEADER_NAME.to_string(),
            scheme: DEFAULT_SCHEME.to_string(),
            authentication_type: DEFAULT_AUTHENTICATION_TYPE.to_string(),
        }
    }
}

impl ApiKeyOptions {
    /// Defaults overridden by KEYGATE_* variables that are set and non-blank.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let opts = Self {
            header_name: env_or("KEYGATE_HEADER_NAME", defaults.header_name),
            scheme: env_or("KEYGATE_SCHEME", defaults.scheme),
            authentication_type: env_or(
                "KEYGATE_AUTHENTICATION_TYPE",
                defaults.authentication_type,
            ),
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<()> {
        if HeaderName::from_bytes(self.header_name.as_bytes()).is_err() {
            return Err(ConfigError::InvalidHeaderName(self.header_name.clone()));
        }
        if self.scheme.trim().is_empty() {
            return Err(ConfigError::Invalid("scheme must not be empty".into()));
        }
        if self.authentication_type.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "authentication type must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Command line for the `keygate` server. Every flag falls back to an env variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "keygate", version, about = "API key authentication service")]
pub struct Settings {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8088")]
    pub bind_addr: String,

    #[arg(long, env = "KEYGATE_HEADER_NAME", default_value = DEFAULT_HEADER_NAME)]
    pub header_name: String,

    #[arg(long, env = "KEYGATE_SCHEME", default_value = DEFAULT_SCHEME)]
    pub scheme: String,

    #[arg(long, env = "KEYGATE_AUTHENTICATION_TYPE", default_value = DEFAULT_AUTHENTICATION_TYPE)]
    pub authentication_type: String,

    /// Base URL for the `type` member of problem bodies.
    #[arg(long, env = "KEYGATE_PROBLEM_TYPE_BASE", default_value = DEFAULT_PROBLEM_TYPE_BASE)]
    pub problem_type_base: String,

    /// YAML/JSON file with keys to load at startup.
    #[arg(long, env = "KEYGATE_SEED_FILE")]
    pub seed_file: Option<PathBuf>,
}

impl Settings {
    pub fn api_key_options(&self) -> Result<ApiKeyOptions> {
        let opts = ApiKeyOptions {
            header_name: self.header_name.trim().to_string(),
            scheme: self.scheme.trim().to_string(),
            authentication_type: self.authentication_type.trim().to_string(),
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn problem_settings(&self) -> ProblemSettings {
        ProblemSettings {
            type_base_url: self.problem_type_base.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound = "E: DeserializeOwned")]
struct SeedFile<E> {
    #[serde(default = "Vec::new")]
    keys: Vec<ApiKeyRecord<E>>,
}

/// Parse seed records from YAML or JSON text.
pub fn parse_seed<E: DeserializeOwned>(text: &str) -> Result<Vec<ApiKeyRecord<E>>> {
    let seed: SeedFile<E> = serde_yaml::from_str(text)?;
    Ok(seed.keys)
}

/// Load seed records from a file.
pub fn load_seed_file<E, P>(path: P) -> Result<Vec<ApiKeyRecord<E>>>
where
    E: DeserializeOwned,
    P: AsRef<Path>,
{
    let content = std::fs::read_to_string(path)?;
    parse_seed(&content)
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}
