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

//! Operations to check the health of the service.

use crate::driver::Driver;
use log::debug;
use sql_training_core::db::{self, DbError};
use sql_training_core::driver::{DriverError, DriverResult};

impl Driver {
    /// Checks that the database accepts queries under the query role.
    pub(crate) async fn check_health(self) -> DriverResult<()> {
        if !self.db.is_active() {
            return Err(DriverError::from(DbError::EngineNotInitialized));
        }

        let opts = self.query_session_options();
        let generation = self.db.generation();
        self.db
            .session_scope(None, opts, |session| {
                Box::pin(async move {
                    db::ping(session.ex()).await?;
                    Ok::<(), DriverError>(())
                })
            })
            .await?;
        debug!("Health check passed on engine generation {}", generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::testutils::*;
    use sql_training_core::driver::DriverError;
    use sql_training_core::model::RoleName;

    #[tokio::test]
    async fn test_check_health_ok() {
        let context = TestContext::setup(None);

        context.driver().check_health().await.unwrap();
        context.driver().check_health().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_health_closed_engine() {
        let context = TestContext::setup(None);
        context.db().close().await;

        assert_eq!(
            DriverError::Unavailable("Database engine not initialized".to_owned()),
            context.driver().check_health().await.unwrap_err()
        );
    }

    #[tokio::test]
    async fn test_check_health_role_unsupported_on_sqlite() {
        let context = TestContext::setup(Some(RoleName::from("student")));

        match context.driver().check_health().await {
            Err(DriverError::BackendError(msg)) => assert!(msg.contains("student")),
            e => panic!("Must have failed with BackendError but got: {:?}", e),
        }
    }
}
