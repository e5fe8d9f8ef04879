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

//! Common utilities to interact with a PostgreSQL database.

use crate::db::{DbError, DbResult, EngineOptions, PoolSettings};
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgDatabaseError, PgPool, Postgres};
use std::str::FromStr;

/// Takes a raw SQLx error `e` and converts it to our generic error type.
pub fn map_sqlx_error(e: sqlx::Error) -> DbError {
    match e {
        sqlx::Error::ColumnDecode { source, .. } => DbError::DataIntegrityError(source.to_string()),
        sqlx::Error::Database(e) => match e.downcast_ref::<PgDatabaseError>().code() {
            "23503" /* foreign_key_violation */ => DbError::NotFound,
            "23505" /* unique_violation */ => DbError::AlreadyExists,
            "42501" /* insufficient_privilege */ => {
                DbError::PermissionDenied(e.message().to_owned())
            }
            "53300" /* too_many_connections */ => DbError::Unavailable,
            number => DbError::BackendError(format!("pgsql error {}: {}", number, e)),
        },
        sqlx::Error::PoolClosed => DbError::Unavailable,
        sqlx::Error::PoolTimedOut => DbError::Unavailable,
        sqlx::Error::RowNotFound => DbError::NotFound,
        e => DbError::BackendError(e.to_string()),
    }
}

/// Creates a new pool for the PostgreSQL database described by `opts`, shaped by `settings`.
///
/// Note that this does *not* establish any connection.
pub(super) fn connect_lazy(opts: &EngineOptions, settings: &PoolSettings) -> DbResult<PgPool> {
    let mut options = PgConnectOptions::from_str(&opts.url)
        .map_err(|e| DbError::InvalidConfig(format!("Invalid PostgreSQL URL: {}", e)))?;
    if let Some(application_name) = opts.application_name.as_ref() {
        options = options.application_name(application_name);
    }
    options = match opts.log_statements {
        LevelFilter::Off => options.disable_statement_logging(),
        level => options.log_statements(level),
    };

    Ok(settings.pool_options::<Postgres>().connect_lazy_with(options))
}

/// Test utilities for the PostgreSQL connection.
#[cfg(any(feature = "testutils", test))]
pub mod testutils {
    use super::*;
    use crate::db::DbHelper;
    use crate::env::get_required_var;

    /// Returns the options to connect to the test database.
    ///
    /// The URL comes from the `PGSQL_TEST_URL` environment variable and is amended so that
    /// connections use the `pg_temp` schema by default: any tables created during the test are
    /// deleted at disconnection time.  Note that for this to work, the connection pool must
    /// maintain a single connection open at all times, but not more.
    ///
    /// Given that this is for testing purposes only, any errors will panic.
    pub fn test_options() -> EngineOptions {
        let _can_fail = env_logger::builder().is_test(true).try_init();

        let mut url = get_required_var::<String>("PGSQL_TEST", "URL").unwrap();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str("options=-c%20search_path%3Dpg_temp");

        let mut opts = EngineOptions::new(url);
        opts.pool_size = 1;
        opts.max_overflow = 0;
        opts
    }

    /// Creates a new helper connected to the test database.
    pub fn setup() -> DbHelper {
        DbHelper::connect(test_options()).unwrap()
    }
}
