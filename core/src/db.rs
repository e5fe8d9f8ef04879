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

//! Generic abstraction to access different database systems.
//!
//! The facilities in this module provide an abstraction over different database systems such as
//! PostgreSQL and SQLite.  The PostgreSQL backend is for production use and the SQLite backend is
//! primarily intended to support unit tests and local development.
//!
//! The entry point is the `DbHelper`, which owns an `Engine` (a connection pool) and hands out
//! `Session`s scoped to a unit of work: each session is committed when the work succeeds, rolled
//! back when it fails, and always returned to the pool (or closed if its state is unknown) when
//! the work completes.

use crate::model::{ModelError, RoleName};
use async_trait::async_trait;

mod engine;
pub use engine::{Engine, EngineOptions, PoolKind, PoolSettings};
mod helper;
pub use helper::DbHelper;
mod session;
pub use session::{Session, SessionConnection, SessionOptions};

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Database errors.  Any unexpected errors that come from the database are classified as
/// `BackendError`, but errors we know about have more specific types.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DbError {
    /// Indicates that a request to create an entry failed because it already exists.
    #[error("Already exists")]
    AlreadyExists,

    /// Catch-all error type for unexpected database errors.
    #[error("Database error: {0}")]
    BackendError(String),

    /// Indicates a failure processing the data that already exists in the database.
    #[error("Data integrity error: {0}")]
    DataIntegrityError(String),

    /// Indicates that the engine was never installed or has already been closed.
    #[error("Database engine not initialized")]
    EngineNotInitialized,

    /// Indicates that the database configuration is invalid.
    #[error("Invalid database configuration: {0}")]
    InvalidConfig(String),

    /// Indicates that a requested entry does not exist.
    #[error("Entity not found")]
    NotFound,

    /// Indicates that the current role lacks the privileges for the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Indicates that the database is not available (maybe because of too many active concurrent
    /// connections).
    #[error("Unavailable")]
    Unavailable,

    /// Indicates that the database system cannot honor the requested session options.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<ModelError> for DbError {
    fn from(e: ModelError) -> Self {
        DbError::DataIntegrityError(e.to_string())
    }
}

/// Result type for this module.
pub type DbResult<T> = Result<T, DbError>;

/// The flavor of SQL spoken by a database system.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dialect {
    /// PostgreSQL.
    Postgres,

    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// Determines the dialect to use for a database `url` based on its scheme.
    pub fn from_url(url: &str) -> DbResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            let scheme = url.split(':').next().unwrap_or_default();
            Err(DbError::InvalidConfig(format!("Unsupported database URL scheme '{}'", scheme)))
        }
    }

    /// Checks that this dialect can honor the session options `opts`.
    pub fn check(self, opts: &SessionOptions) -> DbResult<()> {
        match self {
            Dialect::Postgres => Ok(()),
            Dialect::Sqlite => {
                if let Some(role) = opts.role.as_ref() {
                    return Err(DbError::Unsupported(format!(
                        "SQLite has no roles; cannot switch to {}",
                        role
                    )));
                }
                if opts.read_only {
                    return Err(DbError::Unsupported(
                        "SQLite cannot start read-only transactions".to_owned(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Statement to start a transaction.
    fn begin(self, read_only: bool) -> &'static str {
        match (self, read_only) {
            (Dialect::Postgres, true) => "BEGIN READ ONLY",
            (_, _) => "BEGIN",
        }
    }

    /// Statement to commit a transaction.
    fn commit(self) -> &'static str {
        "COMMIT"
    }

    /// Statement to roll back a transaction.
    fn rollback(self) -> &'static str {
        "ROLLBACK"
    }

    /// Statement to assume `role` for the rest of the connection's life.
    fn set_role(self, role: &RoleName) -> String {
        format!("SET ROLE {}", role.quoted())
    }

    /// Statement to go back to the connection's login role.
    fn reset_role(self) -> &'static str {
        "RESET ROLE"
    }
}

/// A database executor that can talk to multiple database implementations.
///
/// This type provides a generic mechanism to access a typed instance of a database, which is needed
/// by sqlx to offer type safety guarantees during query compilation.  Users of this type are forced
/// to destructure it and issue different calls for each database.
///
/// An executor owns a connection checked out of the engine's pool.  The connection goes back to
/// the pool when the executor is dropped.
#[derive(Debug)]
pub enum Executor {
    /// A PostgreSQL executor that can be used in `sqlx` operations.
    #[cfg(feature = "postgres")]
    Postgres(sqlx::pool::PoolConnection<sqlx::Postgres>),

    /// A SQLite executor that can be used in `sqlx` operations.
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::pool::PoolConnection<sqlx::Sqlite>),
}

#[async_trait]
impl SessionConnection for Executor {
    fn dialect(&self) -> Dialect {
        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(_) => Dialect::Postgres,

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(_) => Dialect::Sqlite,
        }
    }

    async fn execute(&mut self, sql: &str) -> DbResult<()> {
        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(conn) => sqlx::query(sql)
                .execute(&mut **conn)
                .await
                .map(|_| ())
                .map_err(postgres::map_sqlx_error),

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(conn) => sqlx::query(sql)
                .execute(&mut **conn)
                .await
                .map(|_| ())
                .map_err(sqlite::map_sqlx_error),
        }
    }

    async fn release(self, reusable: bool) -> DbResult<()> {
        if reusable {
            drop(self);
            return Ok(());
        }

        match self {
            #[cfg(feature = "postgres")]
            Executor::Postgres(conn) => conn.close().await.map_err(postgres::map_sqlx_error),

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(conn) => conn.close().await.map_err(sqlite::map_sqlx_error),
        }
    }
}

/// Checks that the database behind `ex` answers queries.
pub async fn ping(ex: &mut Executor) -> DbResult<()> {
    ex.execute("SELECT 1").await
}

/// Macros to help instantiate tests for multiple database systems.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    pub use paste::paste;

    /// Instantiates the `module::name` test for the database configured by `setup`.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_one_test [
        ( $name:ident, $setup:expr, $module:path $(, #[$extra:meta] )? ) => {
            #[tokio::test]
            $(#[$extra])?
            async fn $name() {
                $crate::db::testutils::paste! {
                    $module :: [< $name >]($setup).await;
                }
            }
        }
    ];

    pub use generate_one_test;

    /// Instantiates a collection of tests for a specific database system.
    ///
    /// The database implementation to run the tests against is determined by the `setup`
    /// expression, which needs to return the `EngineOptions` that the tests use to build their
    /// own helpers.
    ///
    /// The `extra` metadata parameter can be used to tag the generated tests.
    #[macro_export]
    macro_rules! generate_tests [
        ( #[$extra:meta], $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module, #[$extra]);
            )+
        };

        ( $setup:expr, $module:path $(, $name:ident)+ ) => {
            $(
                $crate::db::testutils::generate_one_test!($name, $setup, $module);
            )+
        };
    ];

    pub use generate_tests;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::Postgres, Dialect::from_url("postgres://u:p@localhost/db").unwrap());
        assert_eq!(Dialect::Postgres, Dialect::from_url("postgresql://localhost").unwrap());
        assert_eq!(Dialect::Sqlite, Dialect::from_url("sqlite://").unwrap());
        assert_eq!(Dialect::Sqlite, Dialect::from_url("sqlite::memory:").unwrap());
        assert_eq!(Dialect::Sqlite, Dialect::from_url("sqlite:///tmp/x.db").unwrap());

        match Dialect::from_url("mysql://localhost/db") {
            Err(DbError::InvalidConfig(msg)) => assert!(msg.contains("'mysql'")),
            e => panic!("Must have failed with InvalidConfig but got: {:?}", e),
        }
        assert!(Dialect::from_url("").is_err());
    }

    #[test]
    fn test_dialect_check() {
        let plain = SessionOptions::default();
        let with_role = SessionOptions::default().with_role(RoleName::from("reader"));
        let read_only = SessionOptions::default().read_only();

        assert_eq!(Ok(()), Dialect::Postgres.check(&plain));
        assert_eq!(Ok(()), Dialect::Postgres.check(&with_role));
        assert_eq!(Ok(()), Dialect::Postgres.check(&read_only));

        assert_eq!(Ok(()), Dialect::Sqlite.check(&plain));
        match Dialect::Sqlite.check(&with_role) {
            Err(DbError::Unsupported(msg)) => assert!(msg.contains("reader")),
            e => panic!("Must have failed with Unsupported but got: {:?}", e),
        }
        match Dialect::Sqlite.check(&read_only) {
            Err(DbError::Unsupported(_)) => (),
            e => panic!("Must have failed with Unsupported but got: {:?}", e),
        }
    }

    #[test]
    fn test_dialect_statements() {
        assert_eq!("BEGIN", Dialect::Postgres.begin(false));
        assert_eq!("BEGIN READ ONLY", Dialect::Postgres.begin(true));
        assert_eq!("BEGIN", Dialect::Sqlite.begin(false));
        assert_eq!(
            "SET ROLE \"readonly_user\"",
            Dialect::Postgres.set_role(&RoleName::from("readonly_user"))
        );
        assert_eq!("RESET ROLE", Dialect::Postgres.reset_role());
        assert_eq!("COMMIT", Dialect::Sqlite.commit());
        assert_eq!("ROLLBACK", Dialect::Sqlite.rollback());
    }
}
