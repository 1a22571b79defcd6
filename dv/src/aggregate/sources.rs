//! Known sources, maintained at ingestion time

use tracing::info;

use crate::domain::{Event, SourceId, SourceInfo};

/// Ordered directory of sources: the two fixed ones, then devices by discovery
#[derive(Debug, Clone)]
pub struct SourceDirectory {
    sources: Vec<SourceInfo>,
}

impl Default for SourceDirectory {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceInfo::new(SourceId::Issues, SourceId::Issues.default_name()),
                SourceInfo::new(SourceId::Process, SourceId::Process.default_name()),
            ],
        }
    }
}

impl SourceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the event's source; returns true if it was not known before
    pub fn observe(&mut self, event: &Event) -> bool {
        if self.contains(&event.source) {
            return false;
        }
        let name = event
            .source_name
            .clone()
            .unwrap_or_else(|| event.source.default_name());
        info!(source = %event.source, %name, "Discovered new source");
        self.sources.push(SourceInfo::new(event.source.clone(), name));
        true
    }

    pub fn contains(&self, source: &SourceId) -> bool {
        self.sources.iter().any(|info| info.id == *source)
    }

    pub fn list(&self) -> Vec<SourceInfo> {
        self.sources.clone()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
