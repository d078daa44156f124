//! Resource lifecycle status lookup.

mod client;
mod types;

pub use client::{
    HttpStatusClient, ID_PLACEHOLDER, MEDIA_KEY_PLACEHOLDER, StatusClientConfig, StatusSource,
};
pub use types::{ResourceStatus, StatusReport};
