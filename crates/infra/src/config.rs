//! Process configuration from environment variables.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use census_action_cases::SurveyScope;
use census_action_cases::survey::DEFAULT_CCS_QUESTIONNAIRE_TYPES;
use census_action_fulfilment::{FulfilmentRules, RulesError};
use census_action_observability::LogFormat;

use crate::dispatcher::DispatcherConfig;

const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_EVENT_STREAM_KEY: &str = "census:action:events";
const DEFAULT_EVENT_DLQ_KEY: &str = "census:action:events:dlq";
const DEFAULT_CONSUMER_GROUP: &str = "action-processor";
const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;
const DEFAULT_WORKER_CONCURRENCY: usize = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {key}")]
    Missing { key: &'static str },

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Top-level configuration for the worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    /// Number of independent consumer loops.
    pub worker_concurrency: usize,
    /// Two-digit questionnaire types treated as CCS.
    pub ccs_questionnaire_types: Vec<String>,
    /// Replaces the embedded fulfilment rules table when set.
    pub fulfilment_rules_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub redis_url: String,
    pub stream_key: String,
    pub dlq_key: String,
    pub consumer_group: String,
    /// Base consumer name; workers append their index.
    pub consumer_name: String,
    pub max_delivery_attempts: u32,
}

impl AppConfig {
    /// Load from the process environment, seeded from `.env` when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = DatabaseConfig {
            url: get("DATABASE_URL").ok_or(ConfigError::Missing {
                key: "DATABASE_URL",
            })?,
            max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                get("DATABASE_MAX_CONNECTIONS"),
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
        };

        let broker = BrokerConfig {
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            stream_key: get("EVENT_STREAM_KEY")
                .unwrap_or_else(|| DEFAULT_EVENT_STREAM_KEY.to_string()),
            dlq_key: get("EVENT_DLQ_KEY").unwrap_or_else(|| DEFAULT_EVENT_DLQ_KEY.to_string()),
            consumer_group: get("CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer_name: get("CONSUMER_NAME")
                .unwrap_or_else(|| format!("worker-{}", Uuid::now_v7())),
            max_delivery_attempts: parse_or(
                "MAX_DELIVERY_ATTEMPTS",
                get("MAX_DELIVERY_ATTEMPTS"),
                DEFAULT_MAX_DELIVERY_ATTEMPTS,
            )?,
        };
        if broker.max_delivery_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_DELIVERY_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let worker_concurrency = parse_or(
            "WORKER_CONCURRENCY",
            get("WORKER_CONCURRENCY"),
            DEFAULT_WORKER_CONCURRENCY,
        )?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let ccs_questionnaire_types = match get("CCS_QUESTIONNAIRE_TYPES") {
            Some(raw) => parse_questionnaire_types(&raw)?,
            None => DEFAULT_CCS_QUESTIONNAIRE_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        };

        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|e: census_action_observability::UnknownLogFormat| {
                ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            database,
            broker,
            worker_concurrency,
            ccs_questionnaire_types,
            fulfilment_rules_path: get("FULFILMENT_RULES_PATH").map(PathBuf::from),
            log_format,
        })
    }

    pub fn survey_scope(&self) -> SurveyScope {
        SurveyScope::new(self.ccs_questionnaire_types.iter().cloned())
    }

    /// The configured rules table, or the embedded census table.
    pub fn fulfilment_rules(&self) -> Result<FulfilmentRules, RulesError> {
        match &self.fulfilment_rules_path {
            Some(path) => FulfilmentRules::from_file(path),
            None => FulfilmentRules::census(),
        }
    }

    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, RulesError> {
        Ok(DispatcherConfig {
            rules: Arc::new(self.fulfilment_rules()?),
            survey_scope: self.survey_scope(),
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_questionnaire_types(raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t.len() == 2 && t.chars().all(|c| c.is_ascii_digit()) {
                Ok(t.to_string())
            } else {
                Err(ConfigError::Invalid {
                    key: "CCS_QUESTIONNAIRE_TYPES",
                    value: raw.to_string(),
                    reason: format!("'{t}' is not a two-digit questionnaire type"),
                })
            }
        })
        .collect()
}
