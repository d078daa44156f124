//! Watches live audio rooms through their lifecycle and captures their HLS
//! stream into a single audio file.
//!
//! The main pieces, from the bottom up:
//!
//! - [`CredentialStore`]: auth secrets attached to outbound requests, replaceable
//!   at runtime and optionally reloaded from a watched file.
//! - [`StatusSource`] / [`HttpStatusClient`]: lifecycle status of a resource.
//! - [`StreamCapture`]: concurrent chunk download and in-order reassembly.
//! - [`LifecycleWatcher`]: per-resource polling state machine driving a capture.
//! - [`WatcherRegistry`]: at most one watcher per resource ID.
//! - [`SpaceRecorder`]: the facade over all of the above.

pub mod capture;
pub mod credentials;
mod error;
pub mod http;
pub mod naming;
pub mod recorder;
pub mod registry;
pub mod status;
pub mod watcher;

pub use capture::{
    CaptureConfig, CaptureEvent, CaptureOptions, CaptureOutcome, StreamCapture, VariantPolicy,
    capture_from_manifest,
};
pub use credentials::{AuthStatus, CredentialOptions, CredentialStore, Credentials};
pub use error::{Error, ErrorKind, Result, is_retryable_status};
pub use http::{HttpConfig, ProxyAuth, ProxyConfig, ProxyType};
pub use recorder::{DownloadOptions, RecorderConfig, SpaceRecorder};
pub use registry::{RegistryConfig, WatcherRegistry};
pub use status::{HttpStatusClient, ResourceStatus, StatusClientConfig, StatusReport, StatusSource};
pub use watcher::{
    LifecycleWatcher, WatcherConfig, WatcherEvent, WatcherEventKind, WatcherHandle, WatcherState,
};
