//! Change notifications shared by the issues registry and the live feed

use serde::{Deserialize, Serialize};

/// Kind of change delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
    /// A clear sentinel arrived from the buffer
    Cleared,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::Cleared => "CLEARED",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&ChangeType::Added).unwrap(), r#""ADDED""#);
        assert_eq!(serde_json::to_string(&ChangeType::Cleared).unwrap(), r#""CLEARED""#);
        let parsed: ChangeType = serde_json::from_str(r#""DELETED""#).unwrap();
        assert_eq!(parsed, ChangeType::Deleted);
    }

    #[test]
    fn test_display_matches_wire_name() {
        for change in [ChangeType::Added, ChangeType::Updated, ChangeType::Deleted, ChangeType::Cleared] {
            let wire = serde_json::to_string(&change).unwrap();
            assert_eq!(wire.trim_matches('"'), change.to_string());
        }
    }
}
