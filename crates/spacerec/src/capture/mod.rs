//! HLS capture: playlist resolution, concurrent chunk fetches with retry, and
//! in-order reassembly into a single file.

mod config;
mod events;
mod fetcher;
mod job;
mod manifest;
mod retry;
mod sequencer;

pub use config::{CaptureConfig, VariantPolicy};
pub use events::{CaptureEvent, CaptureEventSink};
pub use fetcher::ChunkFetcher;
pub use job::{
    CaptureOptions, CaptureOutcome, PART_SUFFIX, StreamCapture, capture_from_manifest, part_path,
};
pub use manifest::{
    ByteRange, ChunkReference, MediaManifest, ParsedManifest, VariantRef, parse_manifest,
    select_variant,
};
pub use retry::{RetryAction, RetryFailure, RetryPolicy, retry_with_backoff};
pub use sequencer::ChunkSequencer;
