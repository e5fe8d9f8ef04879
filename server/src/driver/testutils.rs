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

//! Test utilities for the business layer.

use crate::driver::Driver;
use sql_training_core::db::DbHelper;
use sql_training_core::db::sqlite;
use sql_training_core::jwt::JwtHelper;
use sql_training_core::model::RoleName;
use std::sync::Arc;

pub(crate) struct TestContext {
    db: Arc<DbHelper>,
    jwt: Arc<JwtHelper>,
    driver: Driver,
}

impl TestContext {
    /// Initializes a driver against an in-memory database that runs queries as `query_role`.
    ///
    /// This must be called from within a Tokio runtime.
    pub(crate) fn setup(query_role: Option<RoleName>) -> Self {
        let db = Arc::from(sqlite::testutils::setup());
        let jwt = Arc::from(JwtHelper::new("test-secret"));
        let driver = Driver::new(db.clone(), jwt.clone(), query_role);
        Self { db, jwt, driver }
    }

    pub(crate) fn db(&self) -> &DbHelper {
        &self.db
    }

    pub(crate) fn jwt(&self) -> &JwtHelper {
        &self.jwt
    }

    pub(crate) fn driver(&self) -> Driver {
        self.driver.clone()
    }
}
