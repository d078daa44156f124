use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a resource as reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
    /// The resource does not exist (or is not visible with current credentials).
    NotFound,
    /// Announced but not started.
    Scheduled,
    /// Live, but no capture manifest is exposed yet.
    LiveNoManifest,
    /// Live with a capture manifest.
    LiveCapturable { manifest_url: String },
    /// Ended; the manifest is present when a replay is still available.
    Ended { manifest_url: Option<String> },
}

impl ResourceStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::LiveNoManifest | Self::LiveCapturable { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    /// Manifest URL to capture from, if any.
    pub fn manifest_url(&self) -> Option<&str> {
        match self {
            Self::LiveCapturable { manifest_url } => Some(manifest_url),
            Self::Ended { manifest_url } => manifest_url.as_deref(),
            _ => None,
        }
    }
}

/// A status together with descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ResourceStatus,
    /// Title of the resource (if available).
    pub title: Option<String>,
    /// Announced start time for scheduled resources (if available).
    pub scheduled_start: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn new(status: ResourceStatus) -> Self {
        Self {
            status,
            title: None,
            scheduled_start: None,
        }
    }
}

impl From<ResourceStatus> for StatusReport {
    fn from(status: ResourceStatus) -> Self {
        Self::new(status)
    }
}

/// Lifecycle phase reported by the status endpoint, before manifest lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemotePhase {
    Scheduled,
    Running,
    Ended,
}

impl RemotePhase {
    pub(crate) fn parse(state: &str) -> Option<Self> {
        match state {
            "NotStarted" | "PrePublished" => Some(Self::Scheduled),
            "Running" => Some(Self::Running),
            "Ended" | "TimedOut" => Some(Self::Ended),
            _ => None,
        }
    }
}

// Wire shapes for the two status endpoints.

#[derive(Debug, Deserialize)]
pub(crate) struct StatusEnvelope {
    pub data: Option<StatusData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusData {
    #[serde(rename = "audioSpace")]
    pub audio_space: Option<AudioSpace>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AudioSpace {
    pub metadata: Option<SpaceMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SpaceMetadata {
    pub state: Option<String>,
    pub media_key: Option<String>,
    pub title: Option<String>,
    /// Milliseconds since the epoch.
    pub scheduled_start: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamStatus {
    pub source: Option<StreamSource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamSource {
    pub location: Option<String>,
}
