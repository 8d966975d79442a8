use std::fmt;

use crate::Timestamp;

/// Lifecycle events appended to a provider's audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalProviderEventKind {
    SyncStart,
    SyncPartStart,
    SyncPartEnd,
    SyncEnd,
    SyncError,
}

impl LocalProviderEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncStart => "SyncStart",
            Self::SyncPartStart => "SyncPartStart",
            Self::SyncPartEnd => "SyncPartEnd",
            Self::SyncEnd => "SyncEnd",
            Self::SyncError => "SyncError",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SyncStart" => Some(Self::SyncStart),
            "SyncPartStart" => Some(Self::SyncPartStart),
            "SyncPartEnd" => Some(Self::SyncPartEnd),
            "SyncEnd" => Some(Self::SyncEnd),
            "SyncError" => Some(Self::SyncError),
            _ => None,
        }
    }
}

impl fmt::Display for LocalProviderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only event log.
///
/// `payload` is free text: an error class name for `SyncError`, a
/// provider-defined checkpoint for `SyncPartEnd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProviderEvent {
    pub id: i64,
    pub provider_id: i64,
    pub kind: LocalProviderEventKind,
    pub date: Timestamp,
    pub payload: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [
            LocalProviderEventKind::SyncStart,
            LocalProviderEventKind::SyncPartStart,
            LocalProviderEventKind::SyncPartEnd,
            LocalProviderEventKind::SyncEnd,
            LocalProviderEventKind::SyncError,
        ] {
            assert_eq!(LocalProviderEventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(LocalProviderEventKind::parse("syncstart"), None);
    }
}
