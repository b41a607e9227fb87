//! Environment configuration for the worker and the preview service.
//!
//! Everything is read through a lookup function so tests can hand in a map
//! instead of mutating the process environment.

use aether_atoms::studies::PersistenceSchema;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TABLE_NAME: &str = "imagingStudies";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CAPTION_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";
pub const DEFAULT_CAPTION_FONT_SIZE: f32 = 20.0;
pub const DEFAULT_POLL_SECONDS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_ERROR_BACKOFF_SECONDS: u64 = 5;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// S3 access shared by both binaries.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub bucket: String,
    /// `None` defers to the SDK's default region chain.
    pub region: Option<String>,
    /// `None` defers to the SDK's default credential chain.
    pub credentials: Option<StaticCredentials>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub storage: StorageSettings,
    pub table_name: String,
    pub schema: PersistenceSchema,
    pub openai_api_key: String,
    pub vision_model: String,
    pub openai_base_url: String,
    pub caption_font: PathBuf,
    pub caption_font_size: f32,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub error_backoff: Duration,
}

/// Blank values count as unset.
fn optional<F>(lookup: &F, key: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or(ConfigError::Missing(key))
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default + ToString,
    T::Err: std::fmt::Display,
{
    let value = parsed(lookup, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn finite_positive<F>(lookup: &F, key: &'static str, default: f32) -> Result<f32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parsed(lookup, key, default)?;
    if !value.is_finite() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be a finite number".to_string(),
        });
    }
    positive(lookup, key, default)
}

impl StorageSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = match (
            optional(&lookup, "S3_ACCESS_KEY_ID"),
            optional(&lookup, "S3_SECRET_ACCESS_KEY"),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("S3_SECRET_ACCESS_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("S3_ACCESS_KEY_ID")),
        };

        Ok(Self {
            bucket: required(&lookup, "S3_BUCKET_NAME")?,
            region: optional(&lookup, "S3_REGION"),
            credentials,
        })
    }
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = StorageSettings::from_lookup(&lookup)?;

        let schema = match optional(&lookup, "AI_PERSISTENCE_SCHEMA") {
            None => PersistenceSchema::default(),
            Some(value) => PersistenceSchema::parse(&value).ok_or_else(|| ConfigError::Invalid {
                key: "AI_PERSISTENCE_SCHEMA",
                value,
                reason: "expected `queue` or `embedded`".to_string(),
            })?,
        };

        Ok(Self {
            storage,
            table_name: optional(&lookup, "TABLE_NAME")
                .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            schema,
            openai_api_key: required(&lookup, "OPENAI_API_KEY")?,
            vision_model: optional(&lookup, "OPENAI_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            openai_base_url: optional(&lookup, "OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            caption_font: optional(&lookup, "CAPTION_FONT")
                .unwrap_or_else(|| DEFAULT_CAPTION_FONT.to_string())
                .into(),
            caption_font_size: finite_positive(&lookup, "CAPTION_FONT_SIZE", DEFAULT_CAPTION_FONT_SIZE)?,
            poll_interval: Duration::from_secs(positive(
                &lookup,
                "WORKER_POLL_SECONDS",
                DEFAULT_POLL_SECONDS,
            )?),
            batch_size: positive(&lookup, "WORKER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            error_backoff: Duration::from_secs(positive(
                &lookup,
                "WORKER_ERROR_BACKOFF_SECONDS",
                DEFAULT_ERROR_BACKOFF_SECONDS,
            )?),
        })
    }
}
