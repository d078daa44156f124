use std::path::PathBuf;
use std::sync::Arc;

use crate::Error;

/// Notifications emitted while a capture runs.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// The media playlist was resolved and the output file opened.
    Started {
        manifest_url: String,
        output_path: PathBuf,
        live: bool,
    },
    /// Chunks were appended to the output.
    Progress {
        bytes_written: u64,
        /// Chunks known so far; grows while a live playlist is followed.
        total_chunks: u64,
        chunks_written: u64,
    },
    Complete {
        output_path: PathBuf,
        bytes_written: u64,
        chunks_written: u64,
    },
    Error {
        cause: Arc<Error>,
    },
    Cancelled,
}

impl CaptureEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { .. } | Self::Cancelled
        )
    }
}

/// Callback receiving capture events, invoked inline from the capture task.
pub type CaptureEventSink = Arc<dyn Fn(CaptureEvent) + Send + Sync>;
