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

//! The `RoleName` data type.

use crate::model::{ModelError, ModelResult};
use serde::{Deserialize, Serialize, de::Visitor};
use std::fmt;

/// Maximum length of a role name, which matches PostgreSQL's identifier limit.
const MAX_ROLE_NAME_LENGTH: usize = 63;

/// Represents a correctly-formatted (but maybe non-existent) database role name.
///
/// Role names end up interpolated into `SET ROLE` statements, which cannot take bind parameters,
/// so the set of accepted characters is deliberately narrow: an ASCII letter or underscore
/// followed by ASCII letters, digits, underscores or dollar signs.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    /// Creates a new role name from an untrusted string `s`, making sure it is valid.
    pub fn new<S: Into<String>>(s: S) -> ModelResult<Self> {
        let s = s.into();

        let mut chars = s.chars();
        match chars.next() {
            None => return Err(ModelError("Role name cannot be empty".to_owned())),
            Some(ch) if !(ch.is_ascii_alphabetic() || ch == '_') => {
                return Err(ModelError(format!(
                    "Role name '{}' must start with a letter or an underscore",
                    s
                )));
            }
            Some(_) => (),
        }
        if s.len() > MAX_ROLE_NAME_LENGTH {
            return Err(ModelError("Role name is too long".to_owned()));
        }

        for ch in chars {
            if !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$') {
                return Err(ModelError(format!(
                    "Unsupported character '{}' in role name '{}'",
                    ch, s
                )));
            }
        }

        Ok(Self(s))
    }

    /// Returns a string view of the role name.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the role name as a quoted SQL identifier, preserving its case.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoleName {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoleName::new(value)
    }
}

#[cfg(any(test, feature = "testutils"))]
impl From<&'static str> for RoleName {
    /// Creates a new role name from a hardcoded string, which must be valid.
    fn from(name: &'static str) -> Self {
        RoleName::new(name).expect("Hardcoded role names must be valid")
    }
}

/// A deserialization visitor for a `RoleName`.
struct RoleNameVisitor;

impl Visitor<'_> for RoleNameVisitor {
    type Value = RoleName;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        RoleName::new(v).map_err(|e| E::custom(e.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        RoleName::new(v).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for RoleName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_string(RoleNameVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{Token, assert_de_tokens_error, assert_tokens};

    #[test]
    fn test_rolename_ok() {
        assert_eq!("readonly_user", RoleName::new("readonly_user").unwrap().as_str());
        assert_eq!("_x$1", RoleName::new("_x$1").unwrap().as_str());
        assert_eq!("MixedCase", RoleName::new("MixedCase").unwrap().as_str());
    }

    #[test]
    fn test_rolename_error() {
        assert!(RoleName::new("").is_err());
        assert!(RoleName::new("1abc").is_err());
        assert!(RoleName::new("$abc").is_err());
        assert!(RoleName::new("foo bar").is_err());
        assert!(RoleName::new("foo\"; DROP TABLE x; --").is_err());
        assert!(RoleName::new("foo-bar").is_err());
        assert!(RoleName::new("foo\u{00e9}bar").is_err());

        let mut long_string = "a".repeat(MAX_ROLE_NAME_LENGTH);
        assert!(RoleName::new(&long_string).is_ok());
        long_string.push('x');
        assert!(RoleName::new(&long_string).is_err());
    }

    #[test]
    fn test_rolename_quoted_preserves_case() {
        assert_eq!("\"readonly_user\"", RoleName::from("readonly_user").quoted());
        assert_eq!("\"Admin\"", RoleName::from("Admin").quoted());
    }

    #[test]
    fn test_rolename_ser_de_ok() {
        let role = RoleName::new("reporting").unwrap();
        assert_tokens(&role, &[Token::String("reporting")]);
    }

    #[test]
    fn test_rolename_de_error() {
        assert_de_tokens_error::<RoleName>(
            &[Token::String("a b")],
            "Unsupported character ' ' in role name 'a b'",
        );
    }
}
