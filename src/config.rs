use std::time::Duration;

use envconfig::Envconfig;
use log::debug;

#[derive(Envconfig, Clone, Debug)]
pub struct ResolverConfig {
    /// Deadline for one engine call; `0` disables it
    #[envconfig(from = "AGGREGATION_QUERY_TIMEOUT_SECS", default = "30")]
    pub query_timeout_secs: u64,
}

impl ResolverConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "ResolverConfig loaded: query_timeout_secs={}",
            config.query_timeout_secs
        );
        Ok(config)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 30,
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct PostgresConfig {
    #[envconfig(from = "POSTGRES_USER", default = "postgres")]
    pub user: String,
    #[envconfig(from = "POSTGRES_PASSWORD", default = "postgres")]
    pub password: String,
    #[envconfig(from = "POSTGRES_HOST", default = "localhost:5432")]
    pub host: String,
    #[envconfig(from = "POSTGRES_DB", default = "main")]
    pub dbname: String,
}

impl PostgresConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "PostgresConfig loaded: user={}, host={}, dbname={}",
            config.user, config.host, config.dbname
        );
        Ok(config)
    }

    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}/{}",
            self.user, self.password, self.host, self.dbname
        )
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct DuckDbConfig {
    /// Database file, or `:memory:` for a private in-memory database
    #[envconfig(from = "DUCKDB_PATH", default = ":memory:")]
    pub path: String,

    #[envconfig(from = "DUCKDB_THREADS")]
    pub threads: Option<u32>,
}

impl DuckDbConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "DuckDbConfig loaded: path={}, threads={:?}",
            config.path, config.threads
        );
        Ok(config)
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_empty() || self.path == ":memory:"
    }
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            threads: None,
        }
    }
}

#[derive(Envconfig, Clone)]
pub struct SnowflakeConfig {
    #[envconfig(from = "SNOWFLAKE_ACCOUNT")]
    pub account: String,

    #[envconfig(from = "SNOWFLAKE_USER")]
    pub user: String,

    #[envconfig(from = "SNOWFLAKE_PASSWORD")]
    pub password: String,

    #[envconfig(from = "SNOWFLAKE_WAREHOUSE")]
    pub warehouse: Option<String>,

    #[envconfig(from = "SNOWFLAKE_DATABASE")]
    pub database: Option<String>,

    #[envconfig(from = "SNOWFLAKE_SCHEMA")]
    pub schema: Option<String>,

    #[envconfig(from = "SNOWFLAKE_ROLE")]
    pub role: Option<String>,
}

impl SnowflakeConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "SnowflakeConfig loaded: account={}, user={}, warehouse={:?}, database={:?}, schema={:?}, role={:?}",
            config.account, config.user, config.warehouse, config.database, config.schema, config.role
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct S3Config {
    #[envconfig(from = "TENANT")]
    pub tenant: String,

    #[envconfig(from = "S3_BUCKET_NAME")]
    pub bucket_name: String,
}

impl S3Config {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "S3Config loaded: tenant={}, bucket_name={}",
            config.tenant, config.bucket_name
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct MetricsViewJSONConfig {
    #[envconfig(from = "METRICS_VIEWS_JSON_PATH", default = "metrics_views.json")]
    pub json_path: String,
}

impl MetricsViewJSONConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!("MetricsViewJSONConfig loaded: json_path={}", config.json_path);
        Ok(config)
    }
}
