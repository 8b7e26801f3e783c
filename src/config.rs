use std::time::Duration;

use crate::error::GradeError;
use crate::scale::GradingScale;

pub const DEFAULT_GRAPHQL_ENDPOINT: &str = "http://localhost:9000/graphql";
pub const DEFAULT_ROSTER_API_URL: &str = "http://localhost:8000/api";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Graphql,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub graphql_endpoint: String,
    pub roster_api_url: String,
    pub database_url: Option<String>,
    pub scale: GradingScale,
    pub http_timeout: Duration,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, GradeError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, GradeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let backend = match var("GRADEBOOK_BACKEND").as_deref().map(str::trim) {
            None | Some("graphql") => BackendKind::Graphql,
            Some("postgres") => BackendKind::Postgres,
            Some(other) => {
                return Err(GradeError::Config(format!(
                    "GRADEBOOK_BACKEND must be graphql or postgres, got {other:?}"
                )))
            }
        };

        let scale = match var("GRADING_SCALE") {
            Some(raw) => raw.parse()?,
            None => GradingScale::default(),
        };

        let http_timeout_secs = match var("HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                GradeError::Config(format!("HTTP_TIMEOUT_SECS must be a whole number, got {raw:?}"))
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let database_url = var("DATABASE_URL");
        if backend == BackendKind::Postgres && database_url.is_none() {
            return Err(GradeError::Config(
                "DATABASE_URL must be set for the postgres backend".to_string(),
            ));
        }

        Ok(Self {
            backend,
            graphql_endpoint: var("GRAPHQL_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_GRAPHQL_ENDPOINT.to_string()),
            roster_api_url: var("ROSTER_API_URL")
                .unwrap_or_else(|| DEFAULT_ROSTER_API_URL.to_string()),
            database_url,
            scale,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}
