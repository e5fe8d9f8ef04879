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

//! Entry point to the REST server.

use crate::driver::Driver;
use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use log::info;
use std::time::Instant;
use tower_http::cors::CorsLayer;

mod health_get;
mod ping_get;
#[cfg(test)]
mod testutils;
mod verify_get;

/// Realm reported to clients that fail to authenticate.
pub(crate) const REALM: &str = "sql-training";

/// Logs how long it took to serve each request.
async fn log_timing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        "route {} {} executed in {:.6} s with status {}",
        method,
        path,
        start.elapsed().as_secs_f64(),
        response.status().as_u16()
    );
    response
}

/// Creates the router for the application.
pub(crate) fn app(driver: Driver) -> Router {
    use axum::routing::get;

    let sql_manager = Router::new()
        .route("/ping", get(ping_get::handler))
        .route("/health", get(health_get::handler));

    let auth = Router::new().route("/verify", get(verify_get::handler));

    Router::new()
        .nest("/sql_manager", sql_manager)
        .nest("/auth", auth)
        .layer(middleware::from_fn(log_timing))
        .layer(CorsLayer::permissive())
        .with_state(driver)
}

#[cfg(test)]
mod tests {
    use crate::rest::testutils::*;
    use axum::http;
    use sql_training_core::rest::testutils::*;

    #[tokio::test]
    async fn test_unknown_route() {
        let context = TestContext::setup(None);

        OneShotBuilder::new(context.into_app(), (http::Method::GET, "/nothing"))
            .send_empty()
            .await
            .expect_status(http::StatusCode::NOT_FOUND)
            .take_response()
            .await;
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let context = TestContext::setup(None);

        let response =
            OneShotBuilder::new(context.into_app(), (http::Method::GET, "/sql_manager/ping"))
                .with_header(http::header::ORIGIN, "https://example.com")
                .send_empty()
                .await
                .take_response()
                .await;
        assert_eq!(
            "*",
            response.headers().get(http::header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap()
        );
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let context = TestContext::setup(None);

        let response =
            OneShotBuilder::new(context.into_app(), (http::Method::OPTIONS, "/auth/verify"))
                .with_header(http::header::ORIGIN, "https://example.com")
                .with_header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .with_header(http::header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .send_empty()
                .await
                .take_response()
                .await;
        let headers = response.headers();
        assert!(headers.contains_key(http::header::ACCESS_CONTROL_ALLOW_METHODS));
        assert!(headers.contains_key(http::header::ACCESS_CONTROL_ALLOW_HEADERS));
    }
}
