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

//! Waiting for the services we depend on to accept connections.

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

/// Initial delay between connection attempts to a service.
const INITIAL_DELAY: Duration = Duration::from_millis(50);

/// Maximum delay between connection attempts to a service.
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Error raised when some services did not come up in time.
#[derive(Debug, PartialEq, thiserror::Error)]
#[error("Services not available after {}ms: {}", .timeout.as_millis(), .pending.join(", "))]
pub struct WaitError {
    /// How long we waited.
    pub timeout: Duration,

    /// Addresses of the services that never accepted a connection, sorted.
    pub pending: Vec<String>,
}

/// Returns the well-known port for the URL `scheme`, if any.
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "amqp" => Some(5672),
        "http" => Some(80),
        "https" => Some(443),
        "postgres" | "postgresql" => Some(5432),
        "redis" => Some(6379),
        _ => None,
    }
}

/// Computes the `host:port` address of the service behind `url`.
///
/// Returns `None` for URLs that do not point to a network service, such as SQLite databases.
pub fn service_address(url: &str) -> Result<Option<String>, String> {
    if url.starts_with("sqlite:") {
        return Ok(None);
    }

    let parsed = Url::parse(url).map_err(|e| format!("Invalid service URL: {}", e))?;
    let host = match parsed.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => return Err(format!("Service URL with scheme {} has no host", parsed.scheme())),
    };
    let port = match parsed.port().or_else(|| default_port(parsed.scheme())) {
        Some(port) => port,
        None => return Err(format!("Service URL with scheme {} has no port", parsed.scheme())),
    };
    Ok(Some(format!("{}:{}", host, port)))
}

/// Tries to connect to `address` until it succeeds and then removes it from `pending`.
async fn wait_for_one(address: String, pending: Arc<Mutex<BTreeSet<String>>>) {
    let mut delay = INITIAL_DELAY;
    loop {
        match TcpStream::connect(address.as_str()).await {
            Ok(_) => break,
            Err(e) => {
                debug!("Service {} not ready yet: {}", address, e);
                tokio::time::sleep(delay).await;
                let jitter = Duration::from_millis(rand::random::<u64>() % 50);
                delay = (delay * 2 + jitter).min(MAX_DELAY);
            }
        }
    }

    info!("Service {} is ready", address);
    pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&address);
}

/// Waits in parallel until all services in `addresses` accept TCP connections.
///
/// Fails if any of them is still unavailable after `timeout`.
pub async fn wait_for_services(addresses: &[String], timeout: Duration) -> Result<(), WaitError> {
    let pending = Arc::from(Mutex::from(addresses.iter().cloned().collect::<BTreeSet<String>>()));

    let waiters = addresses.iter().map(|address| wait_for_one(address.clone(), pending.clone()));
    if tokio::time::timeout(timeout, join_all(waiters)).await.is_ok() {
        return Ok(());
    }

    let pending: Vec<String> =
        pending.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect();
    warn!("Gave up waiting for services: {}", pending.join(", "));
    Err(WaitError { timeout, pending })
}
