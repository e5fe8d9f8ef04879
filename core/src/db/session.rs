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

//! Scoped database sessions.

use crate::db::{DbError, DbResult, Dialect, Executor};
use crate::model::RoleName;
use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{error, warn};

/// Options that shape a single session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionOptions {
    /// Role to assume for the duration of the session, if any.
    pub role: Option<RoleName>,

    /// Whether the session's transaction must reject writes.
    pub read_only: bool,
}

impl SessionOptions {
    /// Requests that the session runs under `role`.
    pub fn with_role(mut self, role: RoleName) -> Self {
        self.role = Some(role);
        self
    }

    /// Requests that the session's transaction is read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Operations that a session needs from its underlying connection.
#[async_trait]
pub trait SessionConnection: Send + 'static {
    /// Returns the SQL dialect spoken by the connection.
    fn dialect(&self) -> Dialect;

    /// Runs a single `sql` statement and discards its results.
    async fn execute(&mut self, sql: &str) -> DbResult<()>;

    /// Gives the connection back.  If the connection is not `reusable`, because its transaction or
    /// role state is unknown, it is closed instead of being returned to the pool.
    async fn release(self, reusable: bool) -> DbResult<()>;
}

/// A transactional unit of work bound to a single connection.
#[derive(Debug)]
pub struct Session<C = Executor> {
    /// The connection backing this session.
    conn: C,

    /// The role assumed by this session, if any.
    role: Option<RoleName>,

    /// Whether the session's transaction is read-only.
    read_only: bool,
}

impl<C> Session<C> {
    /// Wraps a `conn` that the caller manages on its own.
    ///
    /// The caller is responsible for any transaction and role handling on `conn`.
    pub fn new(conn: C) -> Self {
        Self { conn, role: None, read_only: false }
    }

    /// Returns the executor backing this session.
    ///
    /// This would be better called `executor` but this method is used so frequently that it makes
    /// call sites too verbose.
    pub fn ex(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Returns the role assumed by this session, if any.
    pub fn role(&self) -> Option<&RoleName> {
        self.role.as_ref()
    }

    /// Returns whether the session's transaction is read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Folds a cleanup error `e` raised while finishing a session into the session's `result`.
///
/// Cleanup errors never hide an earlier error: they are logged and dropped in that case.
fn merge_cleanup_error<T, E>(result: Result<T, E>, e: DbError, step: &str) -> Result<T, E>
where
    E: From<DbError>,
{
    match result {
        Ok(_) => Err(E::from(e)),
        Err(original) => {
            warn!("Failed to {} while finishing a failed session: {}", step, e);
            Err(original)
        }
    }
}

/// Holds the session of a running scope until the scope finishes it.
///
/// If the scope is dropped before finishing, because its future was cancelled or because `work`
/// panicked, the session's transaction and role are still active on the connection.  The guard
/// then hands the session to a background task that rolls it back, resets its role and releases
/// its connection, so that the connection never goes back to the pool in that state.
struct ScopeGuard<C: SessionConnection> {
    /// The session being run, or `None` once the scope has taken it back to release it.
    session: Option<Session<C>>,

    /// Dialect spoken by the session's connection.
    dialect: Dialect,
}

impl<C: SessionConnection> ScopeGuard<C> {
    /// Releases the session's connection and disarms the guard.
    async fn release(mut self, reusable: bool) -> DbResult<()> {
        match self.session.take() {
            Some(session) => session.conn.release(reusable).await,
            None => Ok(()),
        }
    }
}

impl<C: SessionConnection> Drop for ScopeGuard<C> {
    fn drop(&mut self) {
        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Session abandoned before finishing; rolling it back in the background");
                handle.spawn(finish_abandoned(session, self.dialect));
            }
            Err(e) => {
                error!("Session abandoned outside of a runtime; cannot roll it back: {}", e);
            }
        }
    }
}

/// Rolls back an abandoned `session`, resets its role and releases its connection.
async fn finish_abandoned<C: SessionConnection>(mut session: Session<C>, dialect: Dialect) {
    let mut reusable = true;

    if let Err(e) = session.conn.execute(dialect.rollback()).await {
        warn!("Failed to roll back abandoned session: {}", e);
        reusable = false;
    }

    if session.role.is_some() {
        if let Err(e) = session.conn.execute(dialect.reset_role()).await {
            warn!("Failed to reset role of abandoned session: {}", e);
            reusable = false;
        }
    }

    if let Err(e) = session.conn.release(reusable).await {
        warn!("Failed to release connection of abandoned session: {}", e);
    }
}

/// Runs `work` in a new session backed by `conn` and configured by `opts`.
///
/// The session is committed if `work` succeeds and rolled back otherwise, in which case the error
/// returned by `work` is propagated unchanged.  If a role was requested, it is assumed right after
/// the transaction starts and reset once the transaction ends, regardless of the outcome.  `conn`
/// is always released at the end and is only returned to the pool if its state is known.
///
/// If the returned future is dropped before completion, or if `work` panics, the session is
/// finished in the background as if `work` had failed.
pub(super) async fn run_scope<C, T, E, F>(conn: C, opts: SessionOptions, work: F) -> Result<T, E>
where
    C: SessionConnection,
    T: Send,
    E: From<DbError> + Send,
    F: for<'s> FnOnce(&'s mut Session<C>) -> BoxFuture<'s, Result<T, E>> + Send,
{
    let dialect = conn.dialect();
    if let Err(e) = dialect.check(&opts) {
        if let Err(release_err) = conn.release(true).await {
            warn!("Failed to release unused connection: {}", release_err);
        }
        return Err(E::from(e));
    }

    let mut guard = ScopeGuard { session: None, dialect };
    let session =
        guard.session.insert(Session { conn, role: opts.role, read_only: opts.read_only });

    if let Err(e) = session.conn.execute(dialect.begin(session.read_only)).await {
        if let Err(release_err) = guard.release(false).await {
            warn!("Failed to close connection after failed BEGIN: {}", release_err);
        }
        return Err(E::from(e));
    }

    let mut reusable = true;

    let set_role = session.role.as_ref().map(|role| dialect.set_role(role));
    let result = match set_role {
        Some(sql) => match session.conn.execute(&sql).await {
            Ok(()) => work(&mut *session).await,
            Err(e) => Err(E::from(e)),
        },
        None => work(&mut *session).await,
    };

    let mut result = match result {
        Ok(value) => match session.conn.execute(dialect.commit()).await {
            Ok(()) => Ok(value),
            Err(e) => {
                reusable = false;
                Err(E::from(e))
            }
        },
        Err(e) => {
            if let Err(rollback_err) = session.conn.execute(dialect.rollback()).await {
                warn!("Failed to roll back session: {}", rollback_err);
                reusable = false;
            }
            Err(e)
        }
    };

    if session.role.is_some() {
        if let Err(e) = session.conn.execute(dialect.reset_role()).await {
            reusable = false;
            result = merge_cleanup_error(result, e, "reset role");
        }
    }

    if let Err(e) = guard.release(reusable).await {
        result = merge_cleanup_error(result, e, "release connection");
    }

    result
}
