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

//! API to check that the database is reachable.

use crate::driver::Driver;
use axum::extract::State;
use sql_training_core::rest::{ApiResponse, EmptyBody, RestError};

/// API handler.
pub(crate) async fn handler(
    State(driver): State<Driver>,
    _: EmptyBody,
) -> Result<ApiResponse<()>, RestError> {
    driver.check_health().await?;
    Ok(ApiResponse::good("Database is reachable"))
}

#[cfg(test)]
mod tests {
    use crate::rest::testutils::*;
    use axum::http;
    use sql_training_core::model::RoleName;
    use sql_training_core::rest::testutils::*;

    fn route() -> (http::Method, String) {
        (http::Method::GET, "/sql_manager/health".to_owned())
    }

    #[tokio::test]
    async fn test_ok() {
        let context = TestContext::setup(None);

        let (message, _) = OneShotBuilder::new(context.into_app(), route())
            .send_empty()
            .await
            .expect_good::<()>()
            .await;
        assert_eq!("Database is reachable", message);
    }

    #[tokio::test]
    async fn test_engine_not_active() {
        let context = TestContext::setup(None);
        context.db().close().await;

        OneShotBuilder::new(context.into_app(), route())
            .send_empty()
            .await
            .expect_status(http::StatusCode::SERVICE_UNAVAILABLE)
            .expect_error("not initialized")
            .await;
    }

    #[tokio::test]
    async fn test_backend_error() {
        let context = TestContext::setup(Some(RoleName::from("student")));

        OneShotBuilder::new(context.into_app(), route())
            .send_empty()
            .await
            .expect_status(http::StatusCode::INTERNAL_SERVER_ERROR)
            .expect_error("Unsupported.*student")
            .await;
    }

    test_payload_must_be_empty!(TestContext::setup(None).into_app(), route());
}
