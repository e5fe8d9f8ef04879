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

//! REST service that backs the SQL Training application.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use log::{info, warn};
use sql_training_core::db::DbHelper;
use sql_training_core::jwt::{JwtHelper, generate_secure_key};
use sql_training_core::logging::LoggingConfig;
use sql_training_core::waiting::wait_for_services;
use std::error::Error;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub(crate) mod driver;
use driver::Driver;
mod rest;
use rest::app;
pub mod settings;
use settings::Settings;

/// Completes once the process is asked to terminate.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => (),
        _ = terminate => (),
    }
    info!("Shutting down");
}

/// Instantiates all resources to serve the application configured by `settings`.
///
/// While it'd be nice to push this responsibility to `main`, doing so would force us to expose many
/// crate-internal types to the public, which in turn would make dead code detection harder.
pub async fn serve(settings: Settings, logging: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    if settings.wait_timeout.is_zero() {
        info!("Not waiting for dependent services");
    } else {
        wait_for_services(&settings.services()?, settings.wait_timeout).await?;
    }

    let db = Arc::from(DbHelper::connect(settings.db.clone())?);

    let secret = match settings.jwt_secret.as_ref() {
        Some(secret) => secret.clone(),
        None => {
            warn!("No JWT secret configured; tokens will not survive a restart");
            generate_secure_key()
        }
    };
    let jwt = Arc::from(JwtHelper::new(&secret));

    let driver = Driver::new(db.clone(), jwt, settings.query_role.clone());
    let app = app(driver);

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, settings.port)).await?;
    info!(
        "Application initialized: {} {} listening on {} with {:?}",
        logging.app_name(),
        logging.app_version(),
        listener.local_addr()?,
        settings
    );

    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;
    db.close().await;
    Ok(result?)
}
