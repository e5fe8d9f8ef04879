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

//! Operations to validate tokens.

use crate::driver::Driver;
use sql_training_core::driver::{DriverError, DriverResult};

impl Driver {
    /// Validates `token` and returns the claims it carries.
    pub(crate) fn verify_token(self, token: &str) -> DriverResult<serde_json::Value> {
        match self.jwt.verify_token::<serde_json::Value>(token) {
            Some(claims) => Ok(claims),
            None => Err(DriverError::Unauthorized("Invalid or expired token".to_owned())),
        }
    }
}
