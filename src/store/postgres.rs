//! PostgreSQL store backed by a `sqlx` connection pool

use super::MeteringStore;
use crate::query::{SqlParam, SqlStatement, UsageQuery};
use crate::schema::{DailySystemCpu, Metric, METRICS_TABLE};
use crate::{Error, Result, StorageConfig, StorageTarget};

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::{PgPool, Postgres};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::info;

fn insert_metric_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        format!(
            "INSERT INTO {} (name, org_id, labels, timestamp, value) \
             VALUES ($1, $2, $3::jsonb, $4, $5)",
            METRICS_TABLE
        )
    })
}

/// PostgreSQL-backed [`MeteringStore`]
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a pool and verify connectivity with a ping.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let options = connect_options(&config.target)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ping().await?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(store)
    }

    /// Wrap an already configured pool, e.g. one pinned to a `search_path`.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Credentials never pass through a URL string unless the operator supplied one.
fn connect_options(target: &StorageTarget) -> Result<PgConnectOptions> {
    match target {
        StorageTarget::Url(url) => PgConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("invalid DATABASE_URL: {}", e))),
        StorageTarget::Parts {
            host,
            port,
            user,
            password,
            database,
        } => Ok(PgConnectOptions::new()
            .host(host)
            .port(*port)
            .username(user)
            .password(password)
            .database(database)
            .ssl_mode(PgSslMode::Disable)),
    }
}

fn bind_scalar<'q>(
    statement: &'q SqlStatement,
) -> QueryScalar<'q, Postgres, i64, PgArguments> {
    let mut query = sqlx::query_scalar::<Postgres, i64>(&statement.sql);
    for param in &statement.params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Uuid(v) => query.bind(*v),
            SqlParam::Date(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
        };
    }
    query
}

fn bind_rows<'q>(
    statement: &'q SqlStatement,
) -> QueryAs<'q, Postgres, DailySystemCpu, PgArguments> {
    let mut query = sqlx::query_as::<Postgres, DailySystemCpu>(&statement.sql);
    for param in &statement.params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Uuid(v) => query.bind(*v),
            SqlParam::Date(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
        };
    }
    query
}

#[async_trait]
impl MeteringStore for PgStore {
    async fn insert_metric(&self, metric: &Metric, labels_json: &str) -> Result<()> {
        sqlx::query(insert_metric_sql())
            .bind(&metric.name)
            .bind(&metric.org_id)
            .bind(labels_json)
            .bind(metric.timestamp)
            .bind(metric.value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_usage(&self, query: &UsageQuery) -> Result<i64> {
        Ok(bind_scalar(&query.count).fetch_one(&self.pool).await?)
    }

    async fn fetch_usage(&self, query: &UsageQuery) -> Result<Vec<DailySystemCpu>> {
        Ok(bind_rows(&query.data).fetch_all(&self.pool).await?)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_parts() {
        let target = StorageTarget::Parts {
            host: "db.internal".to_string(),
            port: 6543,
            user: "meter".to_string(),
            password: "p@ss:word/".to_string(),
            database: "metering".to_string(),
        };
        let options = connect_options(&target).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "meter");
        assert_eq!(options.get_database(), Some("metering"));
    }

    #[test]
    fn test_insert_targets_metrics_table_with_jsonb_labels() {
        assert_eq!(
            insert_metric_sql(),
            "INSERT INTO metrics (name, org_id, labels, timestamp, value) \
             VALUES ($1, $2, $3::jsonb, $4, $5)"
        );
    }

    #[test]
    fn test_connect_options_rejects_bad_url() {
        let err = connect_options(&StorageTarget::Url("::not a url::".to_string())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
