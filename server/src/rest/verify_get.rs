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

//! API to validate a bearer token and return its claims.

use crate::driver::Driver;
use crate::rest::REALM;
use axum::extract::State;
use axum::http::HeaderMap;
use sql_training_core::driver::DriverError;
use sql_training_core::rest::{ApiResponse, EmptyBody, RestError, get_bearer_token};

/// API handler.
pub(crate) async fn handler(
    State(driver): State<Driver>,
    headers: HeaderMap,
    _: EmptyBody,
) -> Result<ApiResponse<serde_json::Value>, RestError> {
    let token = get_bearer_token(&headers, REALM)?;
    match driver.verify_token(token) {
        Ok(claims) => Ok(ApiResponse::good("Token is valid").with_data(claims)),
        Err(DriverError::Unauthorized(message)) => {
            Err(RestError::Unauthorized { scheme: "Bearer", realm: REALM, message })
        }
        Err(e) => Err(e.into()),
    }
}
