// SQL Training
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Connection pools bound to a database URL.

use crate::db::{DbError, DbResult, Dialect, Executor};
use crate::env::{get_optional_var, get_required_var};
use crate::logging::scrub_credentials;
use derivative::Derivative;
use log::LevelFilter;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default value for the `pool_size` configuration property.
const DEFAULT_POOL_SIZE: u32 = 5;

/// Default value for the `max_overflow` configuration property.
const DEFAULT_MAX_OVERFLOW: u32 = 10;

/// Default value for the `pool_recycle` configuration property.
const DEFAULT_POOL_RECYCLE: Duration = Duration::from_secs(3600);

/// Default value for the `acquire_timeout` configuration property.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long connections in a queue pool can stay idle before they are closed.
const QUEUE_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Formats a database URL for debugging purposes without leaking credentials.
#[allow(clippy::ptr_arg)]
fn fmt_url(url: &String, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str(&scrub_credentials(url))
}

/// Options to build an `Engine`.
#[derive(Clone, Derivative)]
#[derivative(Debug, PartialEq)]
pub struct EngineOptions {
    /// Database URL, whose scheme determines the dialect.
    #[derivative(Debug(format_with = "fmt_url"))]
    pub url: String,

    /// Number of connections the pool is sized for.
    pub pool_size: u32,

    /// Number of connections that can be opened on top of `pool_size` under load.
    pub max_overflow: u32,

    /// Tag to attach to connections so that the database can identify this service.
    pub application_name: Option<String>,

    /// Maximum lifetime of a connection before it is replaced.  Zero disables recycling.
    pub pool_recycle: Duration,

    /// Whether to check that a connection is alive before handing it out.
    pub pre_ping: bool,

    /// Maximum time to wait for a connection to become available.
    pub acquire_timeout: Duration,

    /// Level at which to log executed statements.
    pub log_statements: LevelFilter,
}

impl EngineOptions {
    /// Creates a new set of options for `url` with default values for everything else.
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            pool_size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            application_name: None,
            pool_recycle: DEFAULT_POOL_RECYCLE,
            pre_ping: true,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            log_statements: LevelFilter::Off,
        }
    }

    /// Initializes a set of options from environment variables whose name is prefixed with the
    /// given `prefix`.
    ///
    /// This will use variables such as `<prefix>_URL`, `<prefix>_POOL_SIZE`,
    /// `<prefix>_MAX_OVERFLOW`, `<prefix>_APPLICATION_NAME`, `<prefix>_POOL_RECYCLE`,
    /// `<prefix>_PRE_PING` and `<prefix>_LOG_STATEMENTS`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let mut opts = Self::new(get_required_var::<String>(prefix, "URL")?);
        if let Some(pool_size) = get_optional_var::<u32>(prefix, "POOL_SIZE")? {
            opts.pool_size = pool_size;
        }
        if let Some(max_overflow) = get_optional_var::<u32>(prefix, "MAX_OVERFLOW")? {
            opts.max_overflow = max_overflow;
        }
        opts.application_name = get_optional_var::<String>(prefix, "APPLICATION_NAME")?;
        if let Some(pool_recycle) = get_optional_var::<Duration>(prefix, "POOL_RECYCLE")? {
            opts.pool_recycle = pool_recycle;
        }
        if let Some(pre_ping) = get_optional_var::<bool>(prefix, "PRE_PING")? {
            opts.pre_ping = pre_ping;
        }
        if let Some(level) = get_optional_var::<LevelFilter>(prefix, "LOG_STATEMENTS")? {
            opts.log_statements = level;
        }
        Ok(opts)
    }

    /// Returns true if the URL points to an SQLite database that only lives in memory.
    fn is_in_memory_sqlite(&self) -> bool {
        let url = self.url.as_str();
        url == "sqlite://"
            || (url.starts_with("sqlite:")
                && (url.contains(":memory:") || url.contains("mode=memory")))
    }

    /// Computes the settings of the pool to build for these options.
    pub fn pool_settings(&self) -> PoolSettings {
        if self.is_in_memory_sqlite() {
            // An in-memory database vanishes with its connection, so keep exactly one forever.
            PoolSettings {
                kind: PoolKind::Static,
                max_connections: 1,
                min_connections: 1,
                max_lifetime: None,
                idle_timeout: None,
                test_before_acquire: false,
                acquire_timeout: self.acquire_timeout,
            }
        } else {
            PoolSettings {
                kind: PoolKind::Queue,
                max_connections: self.pool_size.saturating_add(self.max_overflow).max(1),
                min_connections: 0,
                max_lifetime: if self.pool_recycle.is_zero() {
                    None
                } else {
                    Some(self.pool_recycle)
                },
                idle_timeout: Some(QUEUE_IDLE_TIMEOUT),
                test_before_acquire: self.pre_ping,
                acquire_timeout: self.acquire_timeout,
            }
        }
    }
}

/// The shape of a connection pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolKind {
    /// A pool with a single connection that is never recycled.
    Static,

    /// A pool that opens connections on demand up to a limit and recycles them.
    Queue,
}

/// Parameters for the connection pool, derived from `EngineOptions`.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolSettings {
    /// Shape of the pool.
    pub kind: PoolKind,

    /// Maximum number of connections to keep open against the database.
    pub max_connections: u32,

    /// Minimum number of connections to keep open against the database.
    pub min_connections: u32,

    /// Maximum lifetime of a connection, if any.
    pub max_lifetime: Option<Duration>,

    /// Maximum idle time of a connection, if any.
    pub idle_timeout: Option<Duration>,

    /// Whether to ping connections before handing them out.
    pub test_before_acquire: bool,

    /// Maximum time to wait for a connection.
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    /// Converts these settings into `sqlx` pool options for the database `DB`.
    pub(super) fn pool_options<DB: sqlx::Database>(&self) -> sqlx::pool::PoolOptions<DB> {
        sqlx::pool::PoolOptions::<DB>::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_timeout)
            .test_before_acquire(self.test_before_acquire)
            .acquire_timeout(self.acquire_timeout)
    }
}

/// The typed pool behind an `Engine`.
#[derive(Clone, Debug)]
enum Pool {
    /// A PostgreSQL pool.
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),

    /// A SQLite pool.
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::SqlitePool),
}

/// A connection pool bound to a database URL.
///
/// Engines are cheap to clone: all clones share the same pool.
#[derive(Clone, Debug)]
pub struct Engine {
    /// Options used to build this engine, kept to be able to rebuild it.
    opts: Arc<EngineOptions>,

    /// The connection pool.
    pool: Pool,
}

impl Engine {
    /// Creates a new engine based on a set of options.
    ///
    /// Note that this does *not* establish any connection: connections are opened on demand.
    /// This must be called from within a Tokio runtime because the pool spawns its maintenance
    /// tasks right away.
    pub fn connect(opts: EngineOptions) -> DbResult<Self> {
        let settings = opts.pool_settings();
        let pool = match Dialect::from_url(&opts.url)? {
            #[cfg(feature = "postgres")]
            Dialect::Postgres => Pool::Postgres(super::postgres::connect_lazy(&opts, &settings)?),

            #[cfg(feature = "sqlite")]
            Dialect::Sqlite => Pool::Sqlite(super::sqlite::connect_lazy(&opts, &settings)?),

            #[allow(unreachable_patterns)]
            dialect => {
                return Err(DbError::InvalidConfig(format!(
                    "Support for {:?} was not compiled in",
                    dialect
                )));
            }
        };
        Ok(Self { opts: Arc::from(opts), pool })
    }

    /// Creates a new engine with the same options as this one.  This one is left untouched.
    pub fn rebuild(&self) -> DbResult<Self> {
        Engine::connect((*self.opts).clone())
    }

    /// Returns the options used to build this engine.
    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Returns the SQL dialect spoken by this engine.
    pub fn dialect(&self) -> Dialect {
        match self.pool {
            #[cfg(feature = "postgres")]
            Pool::Postgres(_) => Dialect::Postgres,

            #[cfg(feature = "sqlite")]
            Pool::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Returns the shape of this engine's pool.
    pub fn pool_kind(&self) -> PoolKind {
        self.opts.pool_settings().kind
    }

    /// Obtains an executor for direct access to the pool, outside of any managed session.
    ///
    /// This would be better called `executor` but this method is used so frequently that it makes
    /// call sites too verbose.
    pub async fn ex(&self) -> DbResult<Executor> {
        match &self.pool {
            #[cfg(feature = "postgres")]
            Pool::Postgres(pool) => {
                let conn = pool.acquire().await.map_err(super::postgres::map_sqlx_error)?;
                Ok(Executor::Postgres(conn))
            }

            #[cfg(feature = "sqlite")]
            Pool::Sqlite(pool) => {
                let conn = pool.acquire().await.map_err(super::sqlite::map_sqlx_error)?;
                Ok(Executor::Sqlite(conn))
            }
        }
    }

    /// Closes all connections and prevents new ones from being opened.
    pub async fn close(&self) {
        match &self.pool {
            #[cfg(feature = "postgres")]
            Pool::Postgres(pool) => pool.close().await,

            #[cfg(feature = "sqlite")]
            Pool::Sqlite(pool) => pool.close().await,
        }
    }

    /// Returns true if `close` has been called on this engine or any of its clones.
    pub fn is_closed(&self) -> bool {
        match &self.pool {
            #[cfg(feature = "postgres")]
            Pool::Postgres(pool) => pool.is_closed(),

            #[cfg(feature = "sqlite")]
            Pool::Sqlite(pool) => pool.is_closed(),
        }
    }
}
