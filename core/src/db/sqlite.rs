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

//! Common utilities to interact with an SQLite database.

use crate::db::{DbError, DbResult, EngineOptions, PoolSettings};
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePool};
use std::str::FromStr;

/// URL that selects a private in-memory database.
const MEMORY_URL: &str = "sqlite::memory:";

/// Takes a raw SQLx error `e` and converts it to our generic error type.
pub fn map_sqlx_error(e: sqlx::Error) -> DbError {
    match e {
        sqlx::Error::ColumnDecode { source, .. } => DbError::DataIntegrityError(source.to_string()),
        sqlx::Error::PoolClosed => DbError::Unavailable,
        sqlx::Error::PoolTimedOut => DbError::Unavailable,
        sqlx::Error::RowNotFound => DbError::NotFound,
        e if e.to_string().contains("FOREIGN KEY constraint failed") => DbError::NotFound,
        e if e.to_string().contains("UNIQUE constraint failed") => DbError::AlreadyExists,
        e => DbError::BackendError(e.to_string()),
    }
}

/// Creates a new pool for the SQLite database described by `opts`, shaped by `settings`.
///
/// The bare `sqlite://` URL selects an in-memory database.  Database files are created if they
/// do not exist yet.
pub(super) fn connect_lazy(opts: &EngineOptions, settings: &PoolSettings) -> DbResult<SqlitePool> {
    let url = if opts.url == "sqlite://" { MEMORY_URL } else { opts.url.as_str() };
    let mut options = SqliteConnectOptions::from_str(url)
        .map_err(|e| DbError::InvalidConfig(format!("Invalid SQLite URL: {}", e)))?
        .create_if_missing(true);
    options = match opts.log_statements {
        LevelFilter::Off => options.disable_statement_logging(),
        level => options.log_statements(level),
    };

    Ok(settings.pool_options::<Sqlite>().connect_lazy_with(options))
}

/// Test utilities for the SQLite connection.
#[cfg(any(feature = "testutils", test))]
pub mod testutils {
    use super::*;
    use crate::db::DbHelper;

    /// Returns the options to connect to a fresh in-memory test database.
    pub fn test_options() -> EngineOptions {
        let _can_fail = env_logger::builder().is_test(true).try_init();
        EngineOptions::new("sqlite://")
    }

    /// Initializes the test database.
    ///
    /// This must be called from within a Tokio runtime.
    pub fn setup() -> DbHelper {
        DbHelper::connect(test_options()).unwrap()
    }
}
