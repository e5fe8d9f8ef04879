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

//! Entry point to the SQL Training service.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

use sql_training::serve;
use sql_training::settings::{ENV_PREFIX, Settings};
use sql_training_core::logging::LoggingConfig;
use std::error::Error;
use std::process::ExitCode;

/// Loads the configuration, sets up logging and runs the server until it is asked to stop.
async fn run() -> Result<(), Box<dyn Error>> {
    let logging =
        LoggingConfig::from_env(ENV_PREFIX, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))?;
    logging.install()?;

    let settings = Settings::from_env(ENV_PREFIX)?;
    serve(settings, &logging).await
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", env!("CARGO_PKG_NAME"), e);
            ExitCode::FAILURE
        }
    }
}
