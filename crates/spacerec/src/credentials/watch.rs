//! Polling watch over the credential file.
//!
//! The file's metadata fingerprint (modification time and length) is sampled
//! every `poll_interval`. Each observed change pushes a debounce deadline
//! forward; the reload happens once the deadline passes without further
//! changes, so editors that write in several steps trigger a single reload.

use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::{Duration, SystemTime};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::store::CredentialStore;

/// Debounce windows shorter than this are raised to it.
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub struct CredentialWatchConfig {
    pub poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for CredentialWatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            debounce: Duration::from_millis(250),
        }
    }
}

impl CredentialWatchConfig {
    pub fn effective_debounce(&self) -> Duration {
        self.debounce.max(MIN_DEBOUNCE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

pub(super) fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    Some(Fingerprint {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Spawn the watch task. It holds only a weak reference to the store and exits
/// when the store is dropped or `token` is cancelled.
///
/// `baseline` is the fingerprint taken when the store read the file; anything
/// different observed later counts as a change.
pub(super) fn spawn_file_watch(
    store: Weak<CredentialStore>,
    path: PathBuf,
    baseline: Option<Fingerprint>,
    config: CredentialWatchConfig,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        watch_loop(store, path, baseline, config, token).await;
    });
}

async fn watch_loop(
    store: Weak<CredentialStore>,
    path: PathBuf,
    baseline: Option<Fingerprint>,
    config: CredentialWatchConfig,
    token: CancellationToken,
) {
    let debounce = config.effective_debounce();
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_seen = baseline;
    let mut reload_at: Option<Instant> = None;

    debug!(path = %path.display(), ?debounce, "Watching credential file");

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(path = %path.display(), "Credential file watch stopped");
                break;
            }

            _ = async {
                match reload_at {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                reload_at = None;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if !store.reload_from_file().await {
                    warn!(path = %path.display(), "Credential file changed but could not be loaded, keeping current values");
                }
            }

            _ = interval.tick() => {
                if store.strong_count() == 0 {
                    break;
                }
                let current = fingerprint(&path);
                if current != last_seen {
                    trace!(path = %path.display(), "Credential file change detected");
                    last_seen = current;
                    reload_at = Some(Instant::now() + debounce);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialOptions, CredentialStore};

    #[test]
    fn debounce_has_a_floor() {
        let config = CredentialWatchConfig {
            poll_interval: Duration::from_millis(50),
            debounce: Duration::from_millis(10),
        };
        assert_eq!(config.effective_debounce(), MIN_DEBOUNCE);
        assert_eq!(
            CredentialWatchConfig::default().effective_debounce(),
            Duration::from_millis(250)
        );
    }

    async fn wait_for(store: &CredentialStore, expected: &str) -> bool {
        for _ in 0..100 {
            if store.snapshot().primary.as_deref() == Some(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test(flavor = "current_thread")]
    async fn file_rewrite_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"primaryAuthValue":"first"}"#).unwrap();

        let store = CredentialStore::init(CredentialOptions {
            file: Some(path.clone()),
            watch: CredentialWatchConfig {
                poll_interval: Duration::from_millis(20),
                debounce: Duration::from_millis(200),
            },
            ..Default::default()
        });
        assert_eq!(store.snapshot().primary.as_deref(), Some("first"));

        // No await since init, so the watch task has not run yet.
        // Different length so the fingerprint changes even on coarse mtime filesystems.
        std::fs::write(
            &path,
            r#"{"primaryAuthValue":"second-value","secondaryVerificationValue":"ct"}"#,
        )
        .unwrap();

        assert!(wait_for(&store, "second-value").await);
        assert_eq!(store.snapshot().secondary.as_deref(), Some("ct"));
        store.shutdown();
    }

    #[tokio::test]
    async fn burst_of_writes_settles_on_last_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"primaryAuthValue":"v0"}"#).unwrap();

        let store = CredentialStore::init(CredentialOptions {
            file: Some(path.clone()),
            watch: CredentialWatchConfig {
                poll_interval: Duration::from_millis(10),
                debounce: Duration::from_millis(200),
            },
            ..Default::default()
        });

        let mut value = String::from("v");
        for _ in 0..5 {
            value.push('x');
            std::fs::write(&path, format!(r#"{{"primaryAuthValue":"{value}"}}"#)).unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        // Writes keep pushing the deadline out, nothing has been applied yet.
        assert_eq!(store.snapshot().primary.as_deref(), Some("v0"));

        assert!(wait_for(&store, &value).await);
        store.shutdown();
    }

    #[tokio::test]
    async fn corrupt_rewrite_keeps_previous_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"primaryAuthValue":"good"}"#).unwrap();

        let store = CredentialStore::init(CredentialOptions {
            file: Some(path.clone()),
            watch: CredentialWatchConfig {
                poll_interval: Duration::from_millis(10),
                debounce: Duration::from_millis(200),
            },
            ..Default::default()
        });

        std::fs::write(&path, "not json at all").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.snapshot().primary.as_deref(), Some("good"));
        store.shutdown();
    }
}
