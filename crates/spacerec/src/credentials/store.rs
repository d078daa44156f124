//! Process-wide credential holder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::types::{AuthStatus, CredentialFile, Credentials};
use super::watch::{CredentialWatchConfig, fingerprint, spawn_file_watch};

/// Options for [`CredentialStore::init`].
///
/// Layers are applied in precedence order: explicit values, then the file,
/// then the environment. A lower layer only fills fields left unset above it.
#[derive(Debug, Clone, Default)]
pub struct CredentialOptions {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    /// Credential file to read at startup and watch afterwards.
    pub file: Option<PathBuf>,
    /// Consult `SPACEREC_AUTH_TOKEN` / `SPACEREC_CSRF_TOKEN` (and the legacy
    /// `TWITTER_*` names) for fields still unset.
    pub env_fallback: bool,
    pub watch: CredentialWatchConfig,
}

/// Holds the current [`Credentials`] behind an atomically swapped `Arc`.
///
/// Writers build a new value and swap it in under the write lock, so a reader
/// never observes a half-updated pair. Readers take a snapshot per request and
/// must not hold it across an await.
pub struct CredentialStore {
    current: RwLock<Arc<Credentials>>,
    file: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets are intentionally left out.
        f.debug_struct("CredentialStore")
            .field("status", &self.status())
            .field("file", &self.file)
            .finish()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(Credentials::default())
    }
}

impl CredentialStore {
    /// A store with fixed initial values and no file backing.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            current: RwLock::new(Arc::new(credentials)),
            file: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build a store from layered sources and start watching the credential
    /// file if one is configured.
    ///
    /// Must be called from within a tokio runtime when `options.file` is set.
    pub fn init(options: CredentialOptions) -> Arc<Self> {
        let mut credentials = Credentials::new(options.primary, options.secondary);

        // Fingerprint before the read: a rewrite racing it shows up as a change.
        let baseline = options.file.as_deref().and_then(fingerprint);
        if let Some(path) = options.file.as_deref()
            && let Some(from_file) = read_credential_file(path)
        {
            credentials.fill_missing(from_file);
        }

        if options.env_fallback {
            credentials.fill_missing(Credentials::from_env());
        }

        let store = Arc::new(Self {
            current: RwLock::new(Arc::new(credentials)),
            file: options.file,
            shutdown: CancellationToken::new(),
        });

        info!(status = ?store.status(), "Credential store initialized");

        if let Some(path) = store.file.clone() {
            spawn_file_watch(
                Arc::downgrade(&store),
                path,
                baseline,
                options.watch,
                store.shutdown.child_token(),
            );
        }

        store
    }

    /// The current credential pair.
    pub fn snapshot(&self) -> Arc<Credentials> {
        self.current.read().clone()
    }

    /// Headers for an outbound request, built from a fresh snapshot.
    pub fn current_headers(&self) -> HeaderMap {
        self.snapshot().headers()
    }

    pub fn status(&self) -> AuthStatus {
        self.snapshot().status()
    }

    pub fn set_primary(&self, value: Option<String>) {
        self.update(|creds| creds.primary = value);
    }

    pub fn set_secondary(&self, value: Option<String>) {
        self.update(|creds| creds.secondary = value);
    }

    /// Replace both values in a single swap.
    pub fn set(&self, primary: Option<String>, secondary: Option<String>) {
        self.update(|creds| {
            creds.primary = primary;
            creds.secondary = secondary;
        });
    }

    fn update(&self, apply: impl FnOnce(&mut Credentials)) {
        let mut guard = self.current.write();
        let mut next = Credentials::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
        debug!(status = ?guard.status(), "Credentials replaced");
    }

    /// The watched credential file, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Re-read the credential file, overriding the fields it contains.
    ///
    /// Returns `false` (leaving current values untouched) when there is no
    /// file, it is missing, empty or unparseable.
    pub async fn reload_from_file(&self) -> bool {
        let Some(path) = self.file.as_deref() else {
            return false;
        };
        let raw = tokio::fs::read_to_string(path).await;
        let Some(from_file) = parse_credential_file(path, raw) else {
            return false;
        };

        self.update(|creds| {
            if from_file.primary.is_some() {
                creds.primary = from_file.primary;
            }
            if from_file.secondary.is_some() {
                creds.secondary = from_file.secondary;
            }
        });
        info!(path = %path.display(), "Reloaded credentials from file");
        true
    }

    /// Stop the file watch task, if running.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Startup read of the credential file, swallowing every failure.
fn read_credential_file(path: &Path) -> Option<Credentials> {
    parse_credential_file(path, std::fs::read_to_string(path))
}

fn parse_credential_file(path: &Path, raw: std::io::Result<String>) -> Option<Credentials> {
    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Credential file not readable");
            return None;
        }
    };

    if raw.trim().is_empty() {
        return None;
    }

    match CredentialFile::parse(&raw) {
        Ok(file) => Some(file.into_credentials()),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Ignoring unparseable credential file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::COOKIE;

    #[test]
    fn set_primary_keeps_secondary() {
        let store = CredentialStore::new(Credentials::new(Some("a".into()), Some("b".into())));
        store.set_primary(Some("a2".into()));
        let snap = store.snapshot();
        assert_eq!(snap.primary.as_deref(), Some("a2"));
        assert_eq!(snap.secondary.as_deref(), Some("b"));
    }

    #[test]
    fn old_snapshot_is_unaffected_by_rotation() {
        let store = CredentialStore::new(Credentials::new(Some("old".into()), None));
        let before = store.snapshot();
        store.set(Some("new".into()), Some("ct".into()));
        assert_eq!(before.primary.as_deref(), Some("old"));
        assert_eq!(
            store.current_headers().get(COOKIE).unwrap(),
            "auth_token=new; ct0=ct"
        );
    }

    #[test]
    fn clearing_values_yields_unauthenticated_headers() {
        let store = CredentialStore::new(Credentials::new(Some("a".into()), Some("b".into())));
        store.set(None, None);
        assert!(store.current_headers().is_empty());
    }

    #[tokio::test]
    async fn explicit_values_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(
            &path,
            r#"{"primaryAuthValue":"from-file","secondaryVerificationValue":"file-ct0"}"#,
        )
        .unwrap();

        let store = CredentialStore::init(CredentialOptions {
            primary: Some("explicit".into()),
            file: Some(path),
            ..Default::default()
        });

        let snap = store.snapshot();
        assert_eq!(snap.primary.as_deref(), Some("explicit"));
        assert_eq!(snap.secondary.as_deref(), Some("file-ct0"));
        store.shutdown();
    }

    #[tokio::test]
    async fn corrupt_or_missing_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{\"primaryAuthValue\": ").unwrap();

        let store = CredentialStore::init(CredentialOptions {
            secondary: Some("kept".into()),
            file: Some(corrupt),
            ..Default::default()
        });
        assert_eq!(store.snapshot().secondary.as_deref(), Some("kept"));
        assert!(!store.reload_from_file().await);
        store.shutdown();

        let missing = CredentialStore::init(CredentialOptions {
            file: Some(dir.path().join("nope.json")),
            ..Default::default()
        });
        assert_eq!(*missing.snapshot(), Credentials::default());
        missing.shutdown();
    }

    #[tokio::test]
    async fn reload_overrides_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"primaryAuthValue":"v1"}"#).unwrap();

        let store = CredentialStore::init(CredentialOptions {
            secondary: Some("ct".into()),
            file: Some(path.clone()),
            ..Default::default()
        });

        std::fs::write(&path, r#"{"primaryAuthValue":"v2"}"#).unwrap();
        assert!(store.reload_from_file().await);

        let snap = store.snapshot();
        assert_eq!(snap.primary.as_deref(), Some("v2"));
        assert_eq!(snap.secondary.as_deref(), Some("ct"));
        store.shutdown();
    }
}
