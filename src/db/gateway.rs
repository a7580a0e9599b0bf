//! Connection-per-request database gateway.
//!
//! Every request opens its own connection, runs exactly one statement and
//! closes the connection again. There is no pool: the request rate is bounded
//! by LLM generation time, not by connection setup.
//!
//! # Architecture
//!
//! The gateway uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL session setup and row fetching
//! - `postgres`: PostgreSQL session setup and row fetching
//! - `sqlite`: SQLite session setup and row fetching
//!
//! Each submodule provides identical functionality adapted to the database's
//! type system.

use crate::db::DatabaseType;
use crate::db::types::RowToJson;
use crate::sql::parser::count_statements;
use crate::error::{AppError, AppResult, Upstream};
use crate::models::{QueryResult, ValidatedQuery};
use futures_util::StreamExt;
use sqlx::{Connection, MySqlConnection, PgConnection, SqliteConnection};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

pub const DEFAULT_CONNECT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Mediates all database access for the orchestrator.
///
/// `execute` only accepts a [`ValidatedQuery`], which can only be produced by
/// a classifier, and takes the connection by value so it cannot be reused.
pub trait DatabaseGateway: Send + Sync + 'static {
    type Connection: Send;

    /// Open a fresh connection, retrying on failure.
    fn acquire_connection(&self) -> impl Future<Output = AppResult<Self::Connection>> + Send;

    /// Run one statement and close the connection.
    fn execute(
        &self,
        conn: Self::Connection,
        query: &ValidatedQuery,
    ) -> impl Future<Output = AppResult<QueryResult>> + Send;

    /// Single connection attempt plus `SELECT 1`.
    fn ping(&self) -> impl Future<Output = bool> + Send;
}

/// Settings for [`SqlGateway`].
#[derive(Clone)]
pub struct GatewaySettings {
    pub url: String,
    /// Total connection attempts per request
    pub connect_retries: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub max_rows: usize,
    pub read_only_session: bool,
}

impl GatewaySettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_retries: DEFAULT_CONNECT_RETRIES,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            max_rows: DEFAULT_MAX_ROWS,
            read_only_session: true,
        }
    }
}

impl std::fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("url", &masked_connection_string(&self.url))
            .field("connect_retries", &self.connect_retries)
            .field("retry_delay", &self.retry_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("query_timeout", &self.query_timeout)
            .field("max_rows", &self.max_rows)
            .field("read_only_session", &self.read_only_session)
            .finish()
    }
}

/// Replace the password in a connection URL for logging.
pub fn masked_connection_string(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_err() {
                return "<redacted>".to_string();
            }
            parsed.to_string()
        }
        Ok(_) => url.to_string(),
        Err(_) => "<redacted>".to_string(),
    }
}

/// An open connection to one of the supported engines.
#[derive(Debug)]
pub enum DbConnection {
    Postgres(PgConnection),
    MySql(MySqlConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            Self::Postgres(_) => DatabaseType::PostgreSQL,
            Self::MySql(_) => DatabaseType::MySQL,
            Self::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Close the connection, logging rather than returning failures.
    async fn close(self) {
        let result = match self {
            Self::Postgres(c) => c.close().await,
            Self::MySql(c) => c.close().await,
            Self::SQLite(c) => c.close().await,
        };
        if let Err(e) = result {
            debug!(error = %e, "Error while closing database connection");
        }
    }
}

/// sqlx-backed gateway for PostgreSQL, MySQL and SQLite.
#[derive(Debug, Clone)]
pub struct SqlGateway {
    settings: GatewaySettings,
    db_type: DatabaseType,
}

impl SqlGateway {
    pub fn new(settings: GatewaySettings) -> AppResult<Self> {
        let db_type = DatabaseType::from_connection_string(&settings.url).ok_or_else(|| {
            AppError::internal(format!(
                "Unsupported database URL: {}",
                masked_connection_string(&settings.url)
            ))
        })?;

        info!(
            db_type = %db_type,
            url = %masked_connection_string(&settings.url),
            read_only_session = settings.read_only_session,
            "Database gateway configured"
        );

        Ok(Self { settings, db_type })
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Close a connection; a connection left mid-statement by a timeout may
    /// not answer the terminate message, so closing is bounded too.
    async fn release(&self, conn: DbConnection) {
        if timeout(self.settings.connect_timeout, conn.close())
            .await
            .is_err()
        {
            debug!("Timed out closing database connection");
        }
    }

    /// One connection attempt bounded by the connect timeout.
    async fn connect_once(&self) -> AppResult<DbConnection> {
        let s = &self.settings;
        let attempt = async {
            match self.db_type {
                DatabaseType::PostgreSQL => postgres::connect(s).await.map(DbConnection::Postgres),
                DatabaseType::MySQL => mysql::connect(s).await.map(DbConnection::MySql),
                DatabaseType::SQLite => sqlite::connect(s).await.map(DbConnection::SQLite),
            }
        };

        match timeout(s.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(
                Upstream::Database,
                s.connect_timeout.as_secs(),
            )),
        }
    }
}

impl DatabaseGateway for SqlGateway {
    type Connection = DbConnection;

    async fn acquire_connection(&self) -> AppResult<DbConnection> {
        let attempts = self.settings.connect_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.connect_once().await {
                Ok(conn) => {
                    debug!(attempt, "Database connection established");
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Database connection attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(self.settings.retry_delay).await;
                    }
                }
            }
        }

        let reason = match last_error {
            Some(AppError::UpstreamUnavailable { message, .. }) => message,
            Some(other) => other.to_string(),
            None => "no connection attempt was made".to_string(),
        };
        Err(AppError::unavailable(Upstream::Database, reason))
    }

    async fn execute(
        &self,
        mut conn: DbConnection,
        query: &ValidatedQuery,
    ) -> AppResult<QueryResult> {
        let start = Instant::now();
        let sql = query.as_str();
        let max_rows = self.settings.max_rows;
        let query_timeout = self.settings.query_timeout;

        if let Err(e) = ensure_single_statement(sql, conn.db_type()) {
            warn!(sql = %sql, error = %e, "Refusing to send statement");
            self.release(conn).await;
            return Err(e.with_sql(sql));
        }

        debug!(
            sql = %sql,
            db_type = %conn.db_type(),
            max_rows,
            timeout_secs = query_timeout.as_secs(),
            "Executing query"
        );

        let result = match &mut conn {
            DbConnection::Postgres(c) => postgres::fetch_rows(c, sql, max_rows, query_timeout)
                .await
                .map(|rows| process_rows(rows, max_rows, start)),
            DbConnection::MySql(c) => mysql::fetch_rows(c, sql, max_rows, query_timeout)
                .await
                .map(|rows| process_rows(rows, max_rows, start)),
            DbConnection::SQLite(c) => sqlite::fetch_rows(c, sql, max_rows, query_timeout)
                .await
                .map(|rows| process_rows(rows, max_rows, start)),
        };

        self.release(conn).await;
        result.map_err(|e| e.with_sql(sql))
    }

    async fn ping(&self) -> bool {
        let mut conn = match self.connect_once().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "Database ping failed to connect");
                return false;
            }
        };

        let pinged = match &mut conn {
            DbConnection::Postgres(c) => c.ping().await,
            DbConnection::MySql(c) => c.ping().await,
            DbConnection::SQLite(c) => c.ping().await,
        };

        let ok = match pinged {
            Ok(()) => select_one(&mut conn, self.settings.connect_timeout).await,
            Err(e) => {
                debug!(error = %e, "Database ping failed");
                false
            }
        };

        self.release(conn).await;
        ok
    }
}

/// Run `SELECT 1` on an open connection.
async fn select_one(conn: &mut DbConnection, limit: Duration) -> bool {
    let result = match conn {
        DbConnection::Postgres(c) => postgres::fetch_rows(c, "SELECT 1", 1, limit)
            .await
            .map(|_| ()),
        DbConnection::MySql(c) => mysql::fetch_rows(c, "SELECT 1", 1, limit).await.map(|_| ()),
        DbConnection::SQLite(c) => sqlite::fetch_rows(c, "SELECT 1", 1, limit).await.map(|_| ()),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "Database ping query failed");
            false
        }
    }
}

/// Process rows from any database type into a QueryResult.
fn process_rows<R: RowToJson>(rows: Vec<R>, max_rows: usize, start: Instant) -> QueryResult {
    let execution_time_ms = start.elapsed().as_millis() as u64;

    let Some(first) = rows.first() else {
        return QueryResult {
            columns: Vec::new(),
            rows: Vec::new(),
            execution_time_ms,
            truncated: false,
        };
    };

    let columns = first.column_names();
    let total_rows = rows.len();
    let truncated = total_rows > max_rows;

    let json_rows: Vec<serde_json::Map<String, serde_json::Value>> = rows
        .iter()
        .take(max_rows)
        .map(|r| r.to_json_map())
        .collect();

    if truncated {
        warn!(limit = max_rows, "Query result truncated");
    }

    QueryResult {
        columns,
        rows: json_rows,
        execution_time_ms,
        truncated,
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> AppResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(AppError::from)?);
    }
    Ok(rows)
}

/// The text sent to the database must hold exactly one statement.
fn ensure_single_statement(sql: &str, db_type: DatabaseType) -> AppResult<()> {
    match count_statements(sql, db_type) {
        Ok(1) => Ok(()),
        Ok(n) => Err(AppError::execution(
            format!("Expected exactly one SQL statement, found {}", n),
            None,
        )),
        Err(e) => Err(AppError::execution(
            format!("Failed to tokenize SQL statement: {}", e),
            None,
        )),
    }
}

/// Any failure while opening a session, including rejected credentials,
/// means the database is unavailable for this request.
fn connect_error(err: sqlx::Error) -> AppError {
    match AppError::from(err) {
        AppError::Execution { message, .. } => AppError::unavailable(Upstream::Database, message),
        other => other,
    }
}

fn timeout_error(query_timeout: Duration) -> AppError {
    AppError::execution(
        format!(
            "Query exceeded the {}s execution timeout",
            query_timeout.as_secs()
        ),
        None,
    )
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// Statements run as prepared statements without bind parameters, so
// PostgreSQL and MySQL refuse multi-statement text on the server too.

mod postgres {
    use super::*;
    use sqlx::ConnectOptions;
    use sqlx::postgres::{PgConnectOptions, PgRow};
    use std::str::FromStr;

    pub async fn connect(settings: &GatewaySettings) -> AppResult<PgConnection> {
        let mut session: Vec<(&str, String)> = vec![(
            "statement_timeout",
            settings.query_timeout.as_millis().to_string(),
        )];
        if settings.read_only_session {
            session.push(("default_transaction_read_only", "on".to_string()));
        }

        let options = PgConnectOptions::from_str(&settings.url)
            .map_err(|e| {
                AppError::unavailable(
                    Upstream::Database,
                    format!("Invalid PostgreSQL connection string: {}", e),
                )
            })?
            .options(session);

        options.connect().await.map_err(connect_error)
    }

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        max_rows: usize,
        query_timeout: Duration,
    ) -> AppResult<Vec<PgRow>> {
        let fetch_limit = max_rows + 1;
        let rows_future = sqlx::query(sql)
            .fetch(&mut *conn)
            .take(fetch_limit)
            .collect::<Vec<_>>();

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error(query_timeout)),
        }
    }
}

mod mysql {
    use super::*;
    use sqlx::ConnectOptions;
    use sqlx::Executor;
    use sqlx::mysql::{MySqlConnectOptions, MySqlRow};
    use std::str::FromStr;

    pub async fn connect(settings: &GatewaySettings) -> AppResult<MySqlConnection> {
        let options = MySqlConnectOptions::from_str(&settings.url)
            .map_err(|e| {
                AppError::unavailable(
                    Upstream::Database,
                    format!("Invalid MySQL connection string: {}", e),
                )
            })?
            .charset("utf8mb4");

        let mut conn = options.connect().await.map_err(connect_error)?;
        if settings.read_only_session {
            conn.execute("SET SESSION TRANSACTION READ ONLY")
                .await
                .map_err(connect_error)?;
        }
        Ok(conn)
    }

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        max_rows: usize,
        query_timeout: Duration,
    ) -> AppResult<Vec<MySqlRow>> {
        let fetch_limit = max_rows + 1;
        let rows_future = sqlx::query(sql)
            .fetch(&mut *conn)
            .take(fetch_limit)
            .collect::<Vec<_>>();

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error(query_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::ConnectOptions;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
    use std::str::FromStr;

    pub async fn connect(settings: &GatewaySettings) -> AppResult<SqliteConnection> {
        let options = SqliteConnectOptions::from_str(&settings.url)
            .map_err(|e| {
                AppError::unavailable(
                    Upstream::Database,
                    format!("Invalid SQLite connection string: {}", e),
                )
            })?
            .read_only(settings.read_only_session);

        options.connect().await.map_err(connect_error)
    }

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        max_rows: usize,
        query_timeout: Duration,
    ) -> AppResult<Vec<SqliteRow>> {
        let fetch_limit = max_rows + 1;
        let rows_future = sqlx::query(sql)
            .fetch(&mut *conn)
            .take(fetch_limit)
            .collect::<Vec<_>>();

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error(query_timeout)),
        }
    }
}
