//! Participant and room identities
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TypesError};

/// Characters that cannot appear in an identity because identities are
/// used verbatim as relay subject tokens.
const RESERVED_CHARS: [char; 3] = ['.', '*', '>'];

fn validate(kind: &str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(TypesError::InvalidIdentity(format!("{} must not be empty", kind)));
    }
    if raw.chars().any(|c| c.is_whitespace() || RESERVED_CHARS.contains(&c)) {
        return Err(TypesError::InvalidIdentity(format!(
            "{} '{}' contains whitespace or a reserved character",
            kind, raw
        )));
    }
    Ok(())
}

/// Identity of a call participant.
///
/// Identities are totally ordered; the ordering is what breaks signaling
/// glare between two peers that offer to each other at the same time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create an identity without validation
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    /// Parse and validate an identity
    pub fn parse(raw: &str) -> Result<Self> {
        validate("user id", raw)?;
        Ok(UserId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId::new(value)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

/// Identity of a group call room
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        RoomId(id.into())
    }

    /// Parse and validate a room identity
    pub fn parse(raw: &str) -> Result<Self> {
        validate("room id", raw)?;
        Ok(RoomId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        RoomId::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_ordering() {
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        assert!(alice < bob);
        assert_eq!(alice.clone().max(bob.clone()), bob);
    }

    #[test]
    fn test_parse_rejects_subject_tokens() {
        assert!(UserId::parse("alice").is_ok());
        assert!(UserId::parse("").is_err());
        assert!(UserId::parse("ali ce").is_err());
        assert!(UserId::parse("alice.bob").is_err());
        assert!(RoomId::parse("room>").is_err());
        assert!(RoomId::parse("standup-42").is_ok());
    }

    #[test]
    fn test_serializes_transparently() {
        let json = serde_json::to_string(&UserId::new("carol")).unwrap();
        assert_eq!(json, "\"carol\"");
    }
}
