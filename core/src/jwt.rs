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

//! Issuing and verification of JSON Web Tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use time::OffsetDateTime;

/// Default lifetime of the tokens we issue.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 24 * 60 * 60);

/// Number of random bytes in generated secret keys.
const SECURE_KEY_LENGTH: usize = 32;

/// JWT errors.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum JwtError {
    /// Indicates that the claims cannot be represented as a JSON object.
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Indicates a failure to sign the token.
    #[error("Cannot encode token: {0}")]
    EncodingError(String),
}

/// Result type for this module.
pub type JwtResult<T> = Result<T, JwtError>;

/// Issues and verifies HS256 tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtHelper {
    /// Key to sign new tokens with.
    encoding_key: EncodingKey,

    /// Key to verify tokens with.
    decoding_key: DecodingKey,

    /// How long new tokens remain valid.
    lifetime: Duration,
}

impl JwtHelper {
    /// Creates a new helper that signs and verifies tokens with `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            lifetime: DEFAULT_TOKEN_LIFETIME,
        }
    }

    /// Overrides the lifetime of new tokens.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Returns the lifetime of new tokens.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Creates a token that carries `claims` and that expires after the configured lifetime.
    ///
    /// `claims` must serialize to a JSON object.  Any `exp` claim in it is replaced.
    pub fn create_token<T: Serialize>(&self, claims: &T) -> JwtResult<String> {
        self.create_token_at(claims, OffsetDateTime::now_utc())
    }

    /// Same as `create_token` but computes the expiration time relative to `now`.
    pub fn create_token_at<T: Serialize>(
        &self,
        claims: &T,
        now: OffsetDateTime,
    ) -> JwtResult<String> {
        let mut claims = match serde_json::to_value(claims) {
            Ok(serde_json::Value::Object(claims)) => claims,
            Ok(other) => {
                return Err(JwtError::InvalidClaims(format!(
                    "Claims must be a JSON object but got {}",
                    other
                )));
            }
            Err(e) => return Err(JwtError::InvalidClaims(e.to_string())),
        };
        let exp = (now + self.lifetime).unix_timestamp();
        claims.insert("exp".to_owned(), serde_json::Value::from(exp));

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))
    }

    /// Verifies `token` and returns its claims.
    ///
    /// Returns `None` if the token is expired, has a bad signature, or is otherwise malformed.
    pub fn verify_token<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<T>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("Rejected token: {}", e);
                None
            }
        }
    }
}

/// Generates a random secret suitable to sign tokens, encoded as padded URL-safe base64.
pub fn generate_secure_key() -> String {
    let key = rand::random::<[u8; SECURE_KEY_LENGTH]>();
    URL_SAFE.encode(key)
}
