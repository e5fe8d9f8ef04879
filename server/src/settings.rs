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

//! Runtime configuration of the service.

use derivative::Derivative;
use sql_training_core::db::EngineOptions;
use sql_training_core::env::get_optional_var;
use sql_training_core::model::RoleName;
use sql_training_core::waiting::service_address;
use std::time::Duration;

/// Prefix of all environment variables that configure the service.
pub const ENV_PREFIX: &str = "SQL_TRAINING";

/// Port to listen on when none is configured.
const DEFAULT_PORT: u16 = 3000;

/// How long to wait for dependent services at startup when not configured.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration of the service.
#[derive(Clone, Derivative)]
#[derivative(Debug, PartialEq)]
pub struct Settings {
    /// Port to listen on.
    pub port: u16,

    /// Options to build the database engine.
    pub db: EngineOptions,

    /// Database role to switch to while running user-facing queries, if any.
    pub query_role: Option<RoleName>,

    /// Secret to sign and verify tokens with.  A random one is generated if missing.
    #[derivative(Debug = "ignore")]
    pub jwt_secret: Option<String>,

    /// How long to wait for dependent services at startup.  Zero disables waiting.
    pub wait_timeout: Duration,
}

impl Settings {
    /// Initializes the settings from environment variables whose name is prefixed with `prefix`.
    ///
    /// The database options are read from variables prefixed with `<prefix>_DB`.
    pub fn from_env(prefix: &str) -> Result<Self, String> {
        let mut db = EngineOptions::from_env(&format!("{}_DB", prefix))?;
        if db.application_name.is_none() {
            db.application_name = Some(env!("CARGO_PKG_NAME").to_owned());
        }

        Ok(Self {
            port: get_optional_var::<u16>(prefix, "PORT")?.unwrap_or(DEFAULT_PORT),
            db,
            query_role: get_optional_var::<RoleName>(prefix, "QUERY_ROLE")?,
            jwt_secret: get_optional_var::<String>(prefix, "JWT_SECRET")?,
            wait_timeout: get_optional_var::<Duration>(prefix, "WAIT_TIMEOUT")?
                .unwrap_or(DEFAULT_WAIT_TIMEOUT),
        })
    }

    /// Returns the `host:port` addresses of the network services that must be up before we
    /// can serve requests.
    pub fn services(&self) -> Result<Vec<String>, String> {
        Ok(service_address(&self.db.url)?.into_iter().collect())
    }
}
