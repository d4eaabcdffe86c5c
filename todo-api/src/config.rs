//! Typed service configuration read from `TODO_*` environment variables.
//!
//! # Design
//! `Config::from_env` loads an optional `.env` file and then reads the
//! process environment. All parsing goes through `Config::from_lookup`, which
//! takes a key lookup function, so tests never mutate the real environment.
//! CORS allow-lists are parsed into `http` types here so a bad entry fails at
//! startup rather than when the router is built.

use std::{str::FromStr, time::Duration};

use axum::http::{HeaderName, HeaderValue, Method};

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "TODO_";

#[derive(Clone, Debug)]
pub struct Config {
    /// `localhost`/`local` switches the logger to human-readable output.
    pub environment: String,
    pub logger: LoggerConfig,
    pub http_server: HttpServerConfig,
    pub http_router: HttpRouterConfig,
    pub database: DatabaseConfig,
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub level: String,
}

#[derive(Clone, Debug)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout: Duration,
}

impl HttpServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpRouterConfig {
    pub timeout: Duration,
    /// Empty means any origin.
    pub allowed_origins: Vec<HeaderValue>,
    pub allowed_methods: Vec<Method>,
    pub allowed_headers: Vec<HeaderName>,
}

impl Default for HttpRouterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            allowed_origins: Vec::new(),
            allowed_methods: vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS],
            allowed_headers: vec![
                HeaderName::from_static("content-type"),
                HeaderName::from_static("x-request-id"),
            ],
        }
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub pool_size: u32,
    /// Tables that must exist before the server starts.
    pub tables: Vec<String>,
    pub create_table: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, which receives full variable
    /// names such as `TODO_HTTP_SERVER_PORT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let router_defaults = HttpRouterConfig::default();
        let allowed_origins = match env.get("HTTP_ROUTER_ALLOWED_ORIGINS") {
            None => router_defaults.allowed_origins,
            Some(raw) => parse_origins(&raw)?,
        };
        let allowed_methods = match env.get("HTTP_ROUTER_ALLOWED_METHODS") {
            None => router_defaults.allowed_methods,
            Some(raw) => parse_list(&raw, "TODO_HTTP_ROUTER_ALLOWED_METHODS", |item| {
                Method::from_str(&item.to_ascii_uppercase()).map_err(|e| e.to_string())
            })?,
        };
        let allowed_headers = match env.get("HTTP_ROUTER_ALLOWED_HEADERS") {
            None => router_defaults.allowed_headers,
            Some(raw) => parse_list(&raw, "TODO_HTTP_ROUTER_ALLOWED_HEADERS", |item| {
                HeaderName::from_str(item).map_err(|e| e.to_string())
            })?,
        };

        Ok(Self {
            environment: env.string("ENVIRONMENT", "localhost"),
            logger: LoggerConfig {
                level: env.string("LOGGER_LEVEL", "info"),
            },
            http_server: HttpServerConfig {
                host: env.string("HTTP_SERVER_HOST", "0.0.0.0"),
                port: env.parse("HTTP_SERVER_PORT", 8080)?,
                shutdown_timeout: Duration::from_secs(
                    env.parse("HTTP_SERVER_SHUTDOWN_TIMEOUT_SEC", 10)?,
                ),
            },
            http_router: HttpRouterConfig {
                timeout: Duration::from_secs(env.parse("HTTP_ROUTER_TIMEOUT_SEC", 60)?),
                allowed_origins,
                allowed_methods,
                allowed_headers,
            },
            database: DatabaseConfig {
                host: env.string("DATABASE_HOST", "localhost"),
                port: env.parse("DATABASE_PORT", 5432)?,
                user: env.string("DATABASE_USER", "postgres"),
                password: env.string("DATABASE_PASSWORD", "postgres"),
                db_name: env.string("DATABASE_DB_NAME", "tododb"),
                pool_size: env.parse("DATABASE_POOL_SIZE", 20)?,
                tables: env
                    .get("DATABASE_TABLES")
                    .map(|raw| split_list(&raw).map(str::to_string).collect())
                    .unwrap_or_else(|| vec!["todo".to_string()]),
                create_table: env.parse("DATABASE_CREATE_TABLE", false)?,
            },
        })
    }

    /// Human-readable logs for local development, JSON everywhere else.
    pub fn is_local(&self) -> bool {
        matches!(self.environment.as_str(), "localhost" | "local")
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(format!("{ENV_PREFIX}{key}"), &raw, e)),
        }
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_list<T>(
    raw: &str,
    key: &'static str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<Vec<T>, ConfigError> {
    split_list(raw)
        .map(|item| parse(item).map_err(|reason| ConfigError::invalid(key, item, reason)))
        .collect()
}

fn parse_origins(raw: &str) -> Result<Vec<HeaderValue>, ConfigError> {
    if split_list(raw).any(|item| item == "*") {
        return Ok(Vec::new());
    }
    parse_list(raw, "TODO_HTTP_ROUTER_ALLOWED_ORIGINS", |item| {
        HeaderValue::from_str(item).map_err(|e| e.to_string())
    })
}
