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

//! Building blocks for the SQL Training REST service.
//!
//! The service follows a layered architecture and this crate provides the shared pieces of each
//! layer:
//!
//! 1.  `model`: High-level data types with validation, such as database role names.
//!
//! 1.  `db`: The persistence layer.  The centerpiece is the `DbHelper`, which owns the connection
//!     pool (the "engine"), hands out scoped sessions that are committed or rolled back as a
//!     unit, optionally switches the database role for the duration of a session, and rebuilds
//!     the engine when it detects that it is running in a forked process.
//!
//! 1.  `driver`: Error types for the business logic layer.  Services provide their own `Driver`.
//!
//! 1.  `rest`: Error types, response envelopes and request helpers for the HTTP layer.
//!
//! Alongside the layers, there are cross-cutting utilities: `env` to read configuration from
//! environment variables, `logging` to configure the process logger explicitly, `jwt` to issue
//! and verify tokens, `process` to identify the running process, and `waiting` to block until
//! the services we depend on accept connections.
//!
//! There are result and error types in every layer, such as `DbResult` and `DbError`.  Errors can
//! transparently float to the top of the app using the `?` operator, being translated to HTTP
//! status codes once returned from the REST layer.

// Keep these in sync with other top-level files.
#![warn(anonymous_parameters, bad_style, clippy::missing_docs_in_private_items, missing_docs)]
#![warn(unused, unused_extern_crates, unused_import_braces, unused_qualifications)]
#![warn(unsafe_code)]

pub mod db;
pub mod driver;
pub mod env;
pub mod jwt;
pub mod logging;
pub mod model;
pub mod process;
pub mod rest;
pub mod waiting;
