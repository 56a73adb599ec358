use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::DispatchError;

/// Identifies one logical conversation.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThreadId(String);

impl ThreadId {
    /// Wrap an existing id. Empty or whitespace-only ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, DispatchError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DispatchError::InvalidThreadId);
        }
        Ok(Self(id))
    }

    /// Fresh random thread id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ThreadId {
    type Error = DispatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ThreadId> for String {
    fn from(id: ThreadId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ThreadId {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            ThreadId::new(""),
            Err(DispatchError::InvalidThreadId)
        ));
        assert!(matches!(
            ThreadId::new("   "),
            Err(DispatchError::InvalidThreadId)
        ));
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(ThreadId::generate(), ThreadId::generate());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ThreadId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<ThreadId>("\"\"").is_err());
    }
}
