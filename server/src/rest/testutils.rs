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

//! Test utilities for the REST API.

use crate::driver::Driver;
use crate::rest::app;
use axum::Router;
use sql_training_core::db::DbHelper;
use sql_training_core::db::sqlite;
use sql_training_core::jwt::JwtHelper;
use sql_training_core::model::RoleName;
use std::sync::Arc;

pub(crate) struct TestContext {
    db: Arc<DbHelper>,
    jwt: Arc<JwtHelper>,
    app: Router,
}

impl TestContext {
    /// Initializes the app against an in-memory database that runs queries as `query_role`.
    ///
    /// This must be called from within a Tokio runtime.
    pub(crate) fn setup(query_role: Option<RoleName>) -> Self {
        let db = Arc::from(sqlite::testutils::setup());
        let jwt = Arc::from(JwtHelper::new("test-secret"));
        let driver = Driver::new(db.clone(), jwt.clone(), query_role);
        let app = app(driver);
        Self { db, jwt, app }
    }

    pub(crate) fn db(&self) -> &DbHelper {
        &self.db
    }

    pub(crate) fn into_app(self) -> Router {
        self.app
    }

    /// Issues a token for `claims` signed with the secret the app verifies tokens with.
    pub(crate) fn token(&self, claims: serde_json::Value) -> String {
        self.jwt.create_token(&claims).unwrap()
    }
}
