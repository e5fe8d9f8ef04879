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

//! Generic business logic for any service.
//!
//! Every service should implement its own `Driver` type, which receives all of its collaborators
//! explicitly at construction time.  In most cases, the definition will look like this:
//!
//! ```rust
//! use sql_training_core::db::DbHelper;
//! use sql_training_core::jwt::JwtHelper;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! pub(crate) struct Driver {
//!     /// The database session lifecycle manager.
//!     db: Arc<DbHelper>,
//!
//!     /// Issuer and verifier of tokens.
//!     jwt: Arc<JwtHelper>,
//! }
//! ```
//!
//! Every operation implemented in the `Driver` should take consume `self` because this is the
//! layer that coordinates multiple operations against the database inside a single session.
//! Consuming `self` prevents the caller from easily issuing multiple operations against the driver,
//! as this would require a clone and highlight an undesirable pattern.

use crate::db::DbError;
use crate::jwt::JwtError;

/// Business logic errors.  These errors encompass backend and logical errors.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// Indicates that a request to create an entry failed because it already exists.
    #[error("{0}")]
    AlreadyExists(String),

    /// Catch-all error type for unexpected database errors.
    #[error("{0}")]
    BackendError(String),

    /// Indicates an error in the input data.
    #[error("{0}")]
    InvalidInput(String),

    /// Indicates that a requested entry does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Indicates that the caller is not allowed to perform the operation.
    #[error("{0}")]
    Unauthorized(String),

    /// Indicates that a service we depend on is not available right now.
    #[error("{0}")]
    Unavailable(String),
}

impl From<DbError> for DriverError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::AlreadyExists => DriverError::AlreadyExists(e.to_string()),
            DbError::BackendError(_) => DriverError::BackendError(e.to_string()),
            DbError::DataIntegrityError(_) => DriverError::BackendError(e.to_string()),
            DbError::EngineNotInitialized => DriverError::Unavailable(e.to_string()),
            DbError::InvalidConfig(_) => DriverError::BackendError(e.to_string()),
            DbError::NotFound => DriverError::NotFound(e.to_string()),
            DbError::PermissionDenied(_) => DriverError::Unauthorized(e.to_string()),
            DbError::Unavailable => DriverError::Unavailable(e.to_string()),
            DbError::Unsupported(_) => DriverError::BackendError(e.to_string()),
        }
    }
}

impl From<JwtError> for DriverError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::InvalidClaims(_) => DriverError::InvalidInput(e.to_string()),
            JwtError::EncodingError(_) => DriverError::BackendError(e.to_string()),
        }
    }
}

/// Result type for this module.
pub type DriverResult<T> = Result<T, DriverError>;
