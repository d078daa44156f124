//! Runtime-replaceable auth secrets attached to outbound requests.

mod store;
mod types;
mod watch;

pub use store::{CredentialOptions, CredentialStore};
pub use types::{
    AuthStatus, CredentialFile, Credentials, PRIMARY_COOKIE, PRIMARY_ENV_VARS, SECONDARY_COOKIE,
    SECONDARY_ENV_VARS, VERIFICATION_HEADER,
};
pub use watch::{CredentialWatchConfig, MIN_DEBOUNCE};
