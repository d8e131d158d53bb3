//! Directory-backed credential store with hot-reload on file changes.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use super::record::{CredentialRecord, Identity, Provider};
use crate::error::ProxyError;

type Observer = Box<dyn Fn(&[CredentialRecord]) + Send + Sync>;

/// Loads `*.json` credential files from a directory and keeps an
/// in-memory snapshot fresh by watching the directory for changes.
///
/// Snapshot replacement is published via `RwLock<Arc<[...]>>` rather than
/// an actor mailbox: readers never block a writer for longer than an
/// `Arc` swap, and there is exactly one writer (the watcher thread plus
/// whichever request thread persists a refreshed token).
pub struct CredentialStore {
    dir: PathBuf,
    snapshot: RwLock<Arc<[CredentialRecord]>>,
    fingerprints: Mutex<HashMap<Identity, String>>,
    observers: Mutex<Vec<Observer>>,
    /// `gl-apikey` records synthesized from config, not backed by a file on
    /// disk — never persisted, always present in every snapshot.
    static_records: Vec<CredentialRecord>,
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

impl CredentialStore {
    /// Loads the directory once, then installs a filesystem watcher that
    /// re-scans the whole directory on any event. Creates `dir` with mode
    /// 0700 if it doesn't exist yet. `static_keys` are `gl-apikey` strings
    /// from config; each becomes an in-memory-only credential record that
    /// survives every rescan alongside the directory's files.
    pub fn open(dir: impl Into<PathBuf>, static_keys: &[String]) -> Result<Arc<Self>, ProxyError> {
        let dir = dir.into();
        ensure_dir(&dir)?;

        let store = Arc::new(CredentialStore {
            dir: dir.clone(),
            snapshot: RwLock::new(Arc::from(Vec::new())),
            fingerprints: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
            static_records: synthesize_static_records(static_keys),
            _watcher: Mutex::new(None),
        });
        store.rescan();

        let watch_store = Arc::clone(&store);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(_event) => watch_store.rescan(),
                Err(err) => error!(error = %err, "credential directory watch error"),
            }
        })
        .map_err(|err| ProxyError::Config(format!("failed to start credential watcher: {err}")))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| ProxyError::Config(format!("failed to watch {}: {err}", dir.display())))?;

        *store._watcher.lock().expect("watcher lock poisoned") = Some(watcher);

        Ok(store)
    }

    /// Current set of credential records. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<[CredentialRecord]> {
        Arc::clone(&self.snapshot.read().expect("credential snapshot lock poisoned"))
    }

    /// Registers a callback invoked synchronously, on the watcher thread,
    /// whenever the snapshot actually changes (not on every filesystem
    /// event — only when the set of (identity, token fingerprint) pairs
    /// differs from the previous snapshot).
    pub fn subscribe(&self, observer: Observer) {
        self.observers.lock().expect("observers lock poisoned").push(observer);
    }

    /// Writes a refreshed record back to its file and updates the snapshot
    /// in place, without waiting for the filesystem watcher to notice.
    pub fn persist(&self, record: CredentialRecord) -> Result<(), ProxyError> {
        let path = self.path_for(&record.identity());
        let body = serde_json::to_vec_pretty(&record)?;

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&body)?;
            set_private_mode(&tmp_path);
        }
        fs::rename(&tmp_path, &path)?;

        let mut fingerprints = self.fingerprints.lock().expect("fingerprints lock poisoned");
        fingerprints.insert(record.identity(), record.token_fingerprint());
        drop(fingerprints);

        self.rescan();
        Ok(())
    }

    fn path_for(&self, identity: &Identity) -> PathBuf {
        let safe_email = identity.email.replace(['/', '\\'], "_");
        let safe_project = identity.project.as_deref().unwrap_or("none").replace(['/', '\\'], "_");
        self.dir.join(format!("{:?}-{safe_email}-{safe_project}.json", identity.provider))
    }

    fn rescan(&self) {
        let mut records = self.static_records.clone();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, dir = %self.dir.display(), "failed to read credential directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<CredentialRecord>(&contents) {
                    Ok(record) => records.push(record),
                    Err(err) => warn!(file = %path.display(), error = %err, "skipping malformed credential file"),
                },
                Err(err) => warn!(file = %path.display(), error = %err, "failed to read credential file"),
            }
        }

        let mut fingerprints = self.fingerprints.lock().expect("fingerprints lock poisoned");
        let new_fingerprints: HashMap<Identity, String> = records
            .iter()
            .map(|r| (r.identity(), r.token_fingerprint()))
            .collect();
        if *fingerprints == new_fingerprints {
            debug!("credential rescan found no changes");
            return;
        }
        *fingerprints = new_fingerprints;
        drop(fingerprints);

        info!(count = records.len(), "credential snapshot refreshed");
        *self.snapshot.write().expect("credential snapshot lock poisoned") = Arc::from(records.clone());

        for observer in self.observers.lock().expect("observers lock poisoned").iter() {
            observer(&records);
        }
    }
}

/// Synthesizes one in-memory `gl-apikey` record per configured static key.
/// These never touch disk and are indexed by position, since a bare API key
/// carries no email or project of its own.
fn synthesize_static_records(keys: &[String]) -> Vec<CredentialRecord> {
    keys.iter()
        .enumerate()
        .map(|(index, key)| CredentialRecord {
            provider: Provider::GlApikey,
            email: format!("gl-apikey-{index}"),
            project: None,
            access_token: None,
            refresh_token: None,
            expiry: None,
            api_key: Some(key.clone()),
            auto: true,
            extra: Default::default(),
        })
        .collect()
}

fn ensure_dir(dir: &Path) -> Result<(), ProxyError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        set_private_mode(dir);
    }
    Ok(())
}

#[cfg(unix)]
fn set_private_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mode = if path.is_dir() { 0o700 } else { 0o600 };
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_private_mode(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::record::Provider;

    fn sample_record(email: &str) -> CredentialRecord {
        CredentialRecord {
            provider: Provider::GlApikey,
            email: email.to_string(),
            project: None,
            access_token: None,
            refresh_token: None,
            expiry: None,
            api_key: Some("key".to_string()),
            auto: true,
            extra: Default::default(),
        }
    }

    #[test]
    fn rescan_skips_malformed_files_without_failing() {
        let dir = std::env::temp_dir().join(format!("relaykit-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("good.json"), serde_json::to_string(&sample_record("a@example.com")).unwrap()).unwrap();
        fs::write(dir.join("bad.json"), "not json").unwrap();

        let store = CredentialStore::open(&dir, &[]).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].email, "a@example.com");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn persist_writes_and_updates_snapshot() {
        let dir = std::env::temp_dir().join(format!("relaykit-test-persist-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let store = CredentialStore::open(&dir, &[]).unwrap();

        store.persist(sample_record("b@example.com")).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].email, "b@example.com");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn static_keys_are_synthesized_and_never_written_to_disk() {
        let dir = std::env::temp_dir().join(format!("relaykit-test-static-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let store = CredentialStore::open(&dir, &["key-a".to_string(), "key-b".to_string()]).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|r| matches!(r.provider, Provider::GlApikey)));
        assert!(snapshot.iter().any(|r| r.api_key.as_deref() == Some("key-a")));
        assert!(snapshot.iter().any(|r| r.api_key.as_deref() == Some("key-b")));
        assert!(fs::read_dir(&dir).unwrap().next().is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn same_email_different_project_does_not_collide_on_filename() {
        let dir = std::env::temp_dir().join(format!("relaykit-test-project-path-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let store = CredentialStore::open(&dir, &[]).unwrap();

        let mut a = sample_record("shared@example.com");
        a.project = Some("proj-a".to_string());
        let mut b = sample_record("shared@example.com");
        b.project = Some("proj-b".to_string());

        store.persist(a).unwrap();
        store.persist(b).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);

        fs::remove_dir_all(&dir).ok();
    }
}
