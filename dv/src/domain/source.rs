//! Source identity
//!
//! A source is a logical origin of events. Two are fixed (the issues registry
//! and the monitored process); devices are discovered as their first event
//! arrives.
//!
//! String form: `issues`, `process`, `device:{id}`

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

const ISSUES: &str = "issues";
const PROCESS: &str = "process";
const DEVICE_PREFIX: &str = "device:";

/// Logical origin of an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    /// The current-issues registry
    Issues,
    /// The monitored process (bundler, compiler, build poller)
    Process,
    /// A connected device, keyed by its device id
    Device(String),
}

impl SourceId {
    /// Create a device source
    pub fn device(id: impl Into<String>) -> Self {
        Self::Device(id.into())
    }

    /// Default display name for this source
    pub fn default_name(&self) -> String {
        match self {
            Self::Issues => "Issues".to_string(),
            Self::Process => "Process".to_string(),
            Self::Device(id) => id.clone(),
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Issues => write!(f, "{}", ISSUES),
            Self::Process => write!(f, "{}", PROCESS),
            Self::Device(id) => write!(f, "{}{}", DEVICE_PREFIX, id),
        }
    }
}

impl FromStr for SourceId {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ISSUES => Ok(Self::Issues),
            PROCESS => Ok(Self::Process),
            other => match other.strip_prefix(DEVICE_PREFIX) {
                Some(id) if !id.is_empty() => Ok(Self::Device(id.to_string())),
                _ => Err(FeedError::UnknownSource(s.to_string())),
            },
        }
    }
}

impl Serialize for SourceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SourceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A known source as presented to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: SourceId,
    pub name: String,
}

impl SourceInfo {
    pub fn new(id: SourceId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}
