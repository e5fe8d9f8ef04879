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

//! Business logic for the service.

use sql_training_core::db::{DbHelper, SessionOptions};
use sql_training_core::jwt::JwtHelper;
use sql_training_core::model::RoleName;
use std::sync::Arc;

mod health;
#[cfg(test)]
mod testutils;
mod verify;

/// Business logic.
///
/// The public operations exposed by the driver are all "one shot": they open and finish their
/// own database session, so it's incorrect for the caller to use two separate calls.  For this
/// reason, these operations consume the driver in an attempt to minimize the possibility of
/// executing two operations.
#[derive(Clone)]
pub(crate) struct Driver {
    /// The database session lifecycle manager.
    db: Arc<DbHelper>,

    /// Issuer and verifier of tokens.
    jwt: Arc<JwtHelper>,

    /// Database role to switch to while running user-facing queries, if any.
    query_role: Option<RoleName>,
}

impl Driver {
    /// Creates a new driver backed by the given injected components.
    pub(crate) fn new(
        db: Arc<DbHelper>,
        jwt: Arc<JwtHelper>,
        query_role: Option<RoleName>,
    ) -> Self {
        Self { db, jwt, query_role }
    }

    /// Returns the options for sessions that run user-facing queries.
    fn query_session_options(&self) -> SessionOptions {
        match self.query_role.as_ref() {
            Some(role) => SessionOptions::default().with_role(role.clone()),
            None => SessionOptions::default(),
        }
    }
}
