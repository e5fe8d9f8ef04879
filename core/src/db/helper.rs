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

//! The database session lifecycle manager.

use crate::db::session::run_scope;
use crate::db::{DbError, DbResult, Engine, EngineOptions, Session, SessionOptions};
use crate::process::{ProcessIdentity, SystemProcess};
use futures::future::BoxFuture;
use log::info;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The engine owned by a `DbHelper` along with the process that built it.
struct EngineSlot {
    /// The current engine, or `None` once the helper has been closed.
    engine: Option<Engine>,

    /// Identifier of the process in which `engine` was built.
    pid: u32,

    /// Number of times the engine has been rebuilt after detecting a fork.
    generation: u64,
}

/// Owns the database engine and hands out scoped sessions.
///
/// Every access to the engine first checks whether the current process is the one that built the
/// engine.  If it is not, the process was forked and the inherited pool cannot be used: a new
/// engine is built from the same options before proceeding.
pub struct DbHelper {
    /// The engine and its provenance.  The lock is never held across an await point.
    slot: RwLock<EngineSlot>,

    /// Source of the current process identifier.
    process: Arc<dyn ProcessIdentity + Send + Sync>,
}

impl DbHelper {
    /// Creates a new helper that owns `engine`.
    pub fn new(engine: Engine) -> Self {
        Self::with_process(engine, Arc::from(SystemProcess::default()))
    }

    /// Creates a new helper with an engine built from `opts`.
    pub fn connect(opts: EngineOptions) -> DbResult<Self> {
        Ok(Self::new(Engine::connect(opts)?))
    }

    /// Creates a new helper that owns `engine` and that identifies the running process via
    /// `process`.
    pub fn with_process(engine: Engine, process: Arc<dyn ProcessIdentity + Send + Sync>) -> Self {
        let pid = process.id();
        Self { slot: RwLock::new(EngineSlot { engine: Some(engine), pid, generation: 0 }), process }
    }

    /// Acquires the slot for reading.  A panic while holding the lock cannot leave the slot in an
    /// inconsistent state, so poisoning is ignored.
    fn read_slot(&self) -> RwLockReadGuard<'_, EngineSlot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the slot for writing, ignoring poisoning like `read_slot` does.
    fn write_slot(&self) -> RwLockWriteGuard<'_, EngineSlot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the engine, rebuilding it first if the process has been forked since it was built.
    pub fn engine(&self) -> DbResult<Engine> {
        let pid = self.process.id();

        {
            let slot = self.read_slot();
            match slot.engine.as_ref() {
                None => return Err(DbError::EngineNotInitialized),
                Some(engine) if slot.pid == pid => return Ok(engine.clone()),
                Some(_) => (),
            }
        }

        let mut slot = self.write_slot();
        // Another caller may have rebuilt the engine while we waited for the lock.
        let fresh = match slot.engine.as_ref() {
            None => return Err(DbError::EngineNotInitialized),
            Some(engine) if slot.pid == pid => return Ok(engine.clone()),
            Some(engine) => engine.rebuild()?,
        };
        let stale = slot.engine.replace(fresh.clone());
        let old_pid = slot.pid;
        slot.pid = pid;
        slot.generation += 1;
        info!(
            "Rebuilt database engine after fork (pid {} -> {}, generation {})",
            old_pid, pid, slot.generation
        );
        // The stale pool's sockets belong to the parent process, so it is dropped without sending
        // any shutdown messages over them.
        drop(stale);
        Ok(fresh)
    }

    /// Returns true if the helper owns an engine.
    pub fn is_active(&self) -> bool {
        self.read_slot().engine.is_some()
    }

    /// Returns the number of times the engine has been rebuilt after detecting a fork.
    pub fn generation(&self) -> u64 {
        self.read_slot().generation
    }

    /// Closes the engine.  Any later attempt to use the helper fails with
    /// `DbError::EngineNotInitialized`.
    pub async fn close(&self) {
        let engine = self.write_slot().engine.take();
        if let Some(engine) = engine {
            engine.close().await;
        }
    }

    /// Runs `work` within a session and returns its result.
    ///
    /// If an `existing` session is given, `work` runs on it as is: the caller that created that
    /// session remains in charge of finishing it.  Otherwise, a new session configured by `opts`
    /// is created, committed if `work` succeeds, rolled back if `work` fails, and closed at the
    /// end.  Errors returned by `work` are propagated unchanged.  A new session that is abandoned,
    /// because the returned future is dropped or `work` panics, is rolled back in the background.
    ///
    /// The fork check happens on every call, including calls that reuse an `existing` session.
    pub async fn session_scope<T, E, F>(
        &self,
        existing: Option<&mut Session>,
        opts: SessionOptions,
        work: F,
    ) -> Result<T, E>
    where
        T: Send,
        E: From<DbError> + Send,
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, E>> + Send,
    {
        let engine = self.engine()?;
        match existing {
            Some(session) => work(session).await,
            None => {
                let conn = engine.ex().await?;
                run_scope(conn, opts, work).await
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{Executor, SessionConnection};
    use crate::process::testutils::SettableProcess;
    use futures::FutureExt;
    use sqlx::Row;
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;

    /// Error type for work that can fail on its own.
    #[derive(Debug, PartialEq)]
    enum WorkError {
        /// The work failed in the database.
        Db(DbError),

        /// The work decided to abort.
        Aborted,
    }

    impl From<DbError> for WorkError {
        fn from(e: DbError) -> Self {
            WorkError::Db(e)
        }
    }

    /// Counts the rows in `table` via `ex`.  The query must be valid for all possible database
    /// implementations.
    async fn count_rows(ex: &mut Executor, table: &str) -> DbResult<i64> {
        let query = format!("SELECT COUNT(*) AS count FROM {}", table);
        match ex {
            #[cfg(feature = "postgres")]
            Executor::Postgres(conn) => {
                let row = sqlx::query(&query)
                    .fetch_one(&mut **conn)
                    .await
                    .map_err(crate::db::postgres::map_sqlx_error)?;
                row.try_get("count").map_err(crate::db::postgres::map_sqlx_error)
            }

            #[cfg(feature = "sqlite")]
            Executor::Sqlite(conn) => {
                let row = sqlx::query(&query)
                    .fetch_one(&mut **conn)
                    .await
                    .map_err(crate::db::sqlite::map_sqlx_error)?;
                row.try_get("count").map_err(crate::db::sqlite::map_sqlx_error)
            }
        }
    }

    /// Creates the `test` table used by these tests.
    async fn create_test_table(db: &DbHelper) {
        let mut ex = db.engine().unwrap().ex().await.unwrap();
        ex.execute("CREATE TABLE test (i INTEGER)").await.unwrap();
    }

    /// Counts the rows in the `test` table.
    async fn count_test_rows(db: &DbHelper) -> i64 {
        let mut ex = db.engine().unwrap().ex().await.unwrap();
        count_rows(&mut ex, "test").await.unwrap()
    }

    pub(crate) async fn test_scope_commits(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        create_test_table(&db).await;

        let result: DbResult<()> = db
            .session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move {
                    session.ex().execute("INSERT INTO test (i) VALUES (3)").await?;
                    session.ex().execute("INSERT INTO test (i) VALUES (4)").await
                })
            })
            .await;
        result.unwrap();

        assert_eq!(2, count_test_rows(&db).await);
        db.close().await;
    }

    pub(crate) async fn test_scope_returns_value(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        create_test_table(&db).await;

        let count: DbResult<i64> = db
            .session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move {
                    session.ex().execute("INSERT INTO test (i) VALUES (3)").await?;
                    count_rows(session.ex(), "test").await
                })
            })
            .await;
        assert_eq!(Ok(1), count);
        db.close().await;
    }

    pub(crate) async fn test_scope_rolls_back_on_caller_error(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        create_test_table(&db).await;

        let result: Result<(), WorkError> = db
            .session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move {
                    session.ex().execute("INSERT INTO test (i) VALUES (3)").await?;
                    Err(WorkError::Aborted)
                })
            })
            .await;
        assert_eq!(Err(WorkError::Aborted), result);

        assert_eq!(0, count_test_rows(&db).await);
        db.close().await;
    }

    pub(crate) async fn test_scope_rolls_back_on_db_error(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        create_test_table(&db).await;

        let result: DbResult<()> = db
            .session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move {
                    session.ex().execute("INSERT INTO test (i) VALUES (3)").await?;
                    session.ex().execute("INSERT INTO missing (i) VALUES (3)").await
                })
            })
            .await;
        match result {
            Err(DbError::BackendError(_)) => (),
            e => panic!("Must have failed with BackendError but got: {:?}", e),
        }

        assert_eq!(0, count_test_rows(&db).await);
        db.close().await;
    }

    pub(crate) async fn test_scope_existing_session_is_not_finished(opts: EngineOptions) {
        let db = Arc::from(DbHelper::connect(opts).unwrap());
        create_test_table(&db).await;

        let inner_db = db.clone();
        let result: Result<(), WorkError> = db
            .session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move {
                    let inner: DbResult<()> = inner_db
                        .session_scope(Some(&mut *session), SessionOptions::default(), |s| {
                            Box::pin(async move {
                                s.ex().execute("INSERT INTO test (i) VALUES (3)").await
                            })
                        })
                        .await;
                    inner?;

                    // The insertion above must still be pending in the outer transaction.
                    assert_eq!(Ok(1), count_rows(session.ex(), "test").await);
                    Err(WorkError::Aborted)
                })
            })
            .await;
        assert_eq!(Err(WorkError::Aborted), result);

        assert_eq!(0, count_test_rows(&db).await);
        db.close().await;
    }

    pub(crate) async fn test_sequential_scopes_share_state(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        create_test_table(&db).await;

        for i in 0..3 {
            let result: DbResult<()> = db
                .session_scope(None, SessionOptions::default(), move |session| {
                    Box::pin(async move {
                        let query = format!("INSERT INTO test (i) VALUES ({})", i);
                        session.ex().execute(&query).await
                    })
                })
                .await;
            result.unwrap();
        }

        assert_eq!(3, count_test_rows(&db).await);
        db.close().await;
    }

    /// Inserts `i` into the `test` table in a scope of its own and commits it.
    async fn insert_committed(db: &DbHelper, i: i32) {
        let result: DbResult<()> = db
            .session_scope(None, SessionOptions::default(), move |session| {
                Box::pin(async move {
                    session.ex().execute(&format!("INSERT INTO test (i) VALUES ({})", i)).await
                })
            })
            .await;
        result.unwrap();
    }

    fn explode() -> DbResult<()> {
        panic!("Work exploded");
    }

    pub(crate) async fn test_scope_cancelled_does_not_leak_transaction(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        create_test_table(&db).await;
        insert_committed(&db, 1).await;

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            db.session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move {
                    session.ex().execute("INSERT INTO test (i) VALUES (2)").await?;
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<(), DbError>(())
                })
            }),
        )
        .await;
        assert!(result.is_err());

        insert_committed(&db, 3).await;
        assert_eq!(2, count_test_rows(&db).await);
        db.close().await;
    }

    pub(crate) async fn test_scope_panic_does_not_leak_transaction(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        create_test_table(&db).await;
        insert_committed(&db, 1).await;

        let result = AssertUnwindSafe(db.session_scope(None, SessionOptions::default(), |session| {
            Box::pin(async move {
                session.ex().execute("INSERT INTO test (i) VALUES (2)").await?;
                explode()
            })
        }))
        .catch_unwind()
        .await;
        assert!(result.is_err());

        insert_committed(&db, 3).await;
        assert_eq!(2, count_test_rows(&db).await);
        db.close().await;
    }

    pub(crate) async fn test_engine_direct_access(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        assert!(db.is_active());
        create_test_table(&db).await;

        let engine = db.engine().unwrap();
        engine.ex().await.unwrap().execute("INSERT INTO test (i) VALUES (3)").await.unwrap();
        assert_eq!(1, count_test_rows(&db).await);
        db.close().await;
    }

    pub(crate) async fn test_fork_rebuilds_engine(opts: EngineOptions) {
        let process = Arc::from(SettableProcess::new(100));
        let db = DbHelper::with_process(Engine::connect(opts).unwrap(), process.clone());
        create_test_table(&db).await;
        assert_eq!(0, db.generation());

        let before = db.engine().unwrap();
        process.fork();
        let after = db.engine().unwrap();
        assert_eq!(1, db.generation());
        assert_eq!(before.options(), after.options());

        // The new engine does not share connections with the old one, so the table, which only
        // lives as long as its connection, is gone.
        let mut ex = after.ex().await.unwrap();
        assert!(count_rows(&mut ex, "test").await.is_err());
        drop(ex);

        // Further accesses from the same process reuse the new engine.
        db.engine().unwrap();
        assert_eq!(1, db.generation());

        let result: DbResult<()> = db
            .session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move { session.ex().execute("SELECT 1").await })
            })
            .await;
        result.unwrap();
        assert_eq!(1, db.generation());

        before.close().await;
        db.close().await;
    }

    pub(crate) async fn test_fork_check_on_existing_session(opts: EngineOptions) {
        let process = Arc::from(SettableProcess::new(100));
        let db = Arc::from(DbHelper::with_process(Engine::connect(opts).unwrap(), process.clone()));

        let mut session = Session::new(db.engine().unwrap().ex().await.unwrap());
        process.fork();
        let result: DbResult<()> = db
            .session_scope(Some(&mut session), SessionOptions::default(), |s| {
                Box::pin(async move { s.ex().execute("SELECT 1").await })
            })
            .await;
        result.unwrap();
        assert_eq!(1, db.generation());

        drop(session);
        db.close().await;
    }

    pub(crate) async fn test_concurrent_fork_checks_rebuild_once(opts: EngineOptions) {
        let process = Arc::from(SettableProcess::new(100));
        let db = Arc::from(DbHelper::with_process(Engine::connect(opts).unwrap(), process.clone()));

        process.fork();
        let mut handles = vec![];
        for _ in 0..10 {
            let db = db.clone();
            handles.push(tokio::spawn(async move { db.engine().map(|_| ()) }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(1, db.generation());
        db.close().await;
    }

    pub(crate) async fn test_closed_helper(opts: EngineOptions) {
        let db = DbHelper::connect(opts).unwrap();
        assert!(db.is_active());

        db.close().await;
        assert!(!db.is_active());
        assert_eq!(DbError::EngineNotInitialized, db.engine().unwrap_err());

        let result: DbResult<()> = db
            .session_scope(None, SessionOptions::default(), |session| {
                Box::pin(async move { session.ex().execute("SELECT 1").await })
            })
            .await;
        assert_eq!(Err(DbError::EngineNotInitialized), result);

        // Closing again is harmless.
        db.close().await;
        assert!(!db.is_active());
    }

    /// Instantiates the backend-agnostic tests for the `DbHelper`.
    #[macro_export]
    macro_rules! generate_db_helper_tests [
        ( $setup:expr $(, #[$extra:meta])? ) => {
            $crate::db::testutils::generate_tests!(
                $( #[$extra], )?
                $setup,
                $crate::db::helper::tests,
                test_scope_commits,
                test_scope_returns_value,
                test_scope_rolls_back_on_caller_error,
                test_scope_rolls_back_on_db_error,
                test_scope_existing_session_is_not_finished,
                test_sequential_scopes_share_state,
                test_scope_cancelled_does_not_leak_transaction,
                test_scope_panic_does_not_leak_transaction,
                test_engine_direct_access,
                test_fork_rebuilds_engine,
                test_fork_check_on_existing_session,
                test_concurrent_fork_checks_rebuild_once,
                test_closed_helper
            );
        }
    ];

    pub(crate) use generate_db_helper_tests;
}
