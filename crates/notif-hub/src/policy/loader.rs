/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Policy directory loading and hot-reload.
//!
//! The policy directory holds one YAML file per org, named `<org_id>.yaml`.
//! A watcher reloads the directory on change with a 100 ms debounce. Reload
//! is atomic per file: a parse error keeps the previously loaded policy.

use notif_models::models::policies::OrgPolicy;
use notif_utils::logging::prelude::*;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Debounce window for filesystem change events.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Loads and caches per-org policies from a directory.
pub struct PolicyLoader {
    dir: PathBuf,
    policies: RwLock<HashMap<String, OrgPolicy>>,
}

impl PolicyLoader {
    /// Creates a loader over a policy directory.
    ///
    /// The directory does not need to exist; a missing directory simply
    /// yields no policies.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the policy for an org, if one is loaded.
    pub fn get(&self, org_id: &str) -> Option<OrgPolicy> {
        self.policies
            .read()
            .expect("policy lock poisoned")
            .get(org_id)
            .cloned()
    }

    /// Number of loaded policies.
    pub fn count(&self) -> usize {
        self.policies.read().expect("policy lock poisoned").len()
    }

    /// Loads every policy file in the directory.
    ///
    /// Files that fail to parse keep their previously loaded version; files
    /// removed from the directory are dropped from the cache.
    pub fn load_all(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Policy dir '{}' not readable: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut seen: Vec<String> = Vec::new();
        let mut loaded = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(org_id) = policy_org_id(&path) else {
                continue;
            };

            seen.push(org_id.clone());

            match load_policy_file(&path) {
                Ok(policy) => {
                    self.policies
                        .write()
                        .expect("policy lock poisoned")
                        .insert(org_id, policy);
                    loaded += 1;
                }
                Err(e) => {
                    // Parse error: the old policy (if any) stays in force
                    error!("Failed to load policy '{}': {}", path.display(), e);
                }
            }
        }

        // Drop policies whose files are gone
        self.policies
            .write()
            .expect("policy lock poisoned")
            .retain(|org_id, _| seen.contains(org_id));

        loaded
    }
}

/// Extracts the org id from a policy file path.
fn policy_org_id(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    if ext != "yaml" && ext != "yml" {
        return None;
    }
    Some(path.file_stem()?.to_str()?.to_string())
}

/// Loads and parses one policy file.
fn load_policy_file(path: &Path) -> Result<OrgPolicy, String> {
    let yaml = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    OrgPolicy::from_yaml(&yaml).map_err(|e| e.to_string())
}

/// Starts the policy directory watcher as a background task.
///
/// Change events are debounced for 100 ms, then the whole directory is
/// reloaded.
pub fn start_policy_watcher(loader: Arc<PolicyLoader>) -> Option<tokio::task::JoinHandle<()>> {
    let dir = loader.dir.clone();
    if !dir.exists() {
        warn!(
            "Policy dir '{}' does not exist, watcher disabled",
            dir.display()
        );
        return None;
    }

    info!("Starting policy watcher for '{}'", dir.display());

    let handle = tokio::task::spawn_blocking(move || {
        if let Err(e) = run_policy_watcher(loader, dir) {
            error!("Policy watcher error: {}", e);
        }
    });

    Some(handle)
}

fn run_policy_watcher(
    loader: Arc<PolicyLoader>,
    dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (tx, rx) = mpsc::channel();

    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                // Only modify/create/remove events are interesting
                if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                    let _ = tx.send(());
                }
            }
        })?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    loop {
        match rx.recv() {
            Ok(()) => {
                // Debounce: let rapid successive writes settle, then drain
                std::thread::sleep(RELOAD_DEBOUNCE);
                while rx.try_recv().is_ok() {}

                let loaded = loader.load_all();
                info!("Policy reload: {} file(s) loaded", loaded);
            }
            Err(mpsc::RecvError) => {
                warn!("Policy watcher channel disconnected");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_policy(dir: &Path, org: &str, yaml: &str) {
        std::fs::write(dir.join(format!("{}.yaml", org)), yaml).unwrap();
    }

    #[test]
    fn test_load_all() {
        let dir = tempfile::tempdir().unwrap();
        write_policy(
            dir.path(),
            "acme",
            "default_deny: true\ntopics:\n  - pattern: \"admin.*\"\n",
        );
        write_policy(dir.path(), "globex", "topics: []\n");
        std::fs::write(dir.path().join("notes.txt"), "not a policy").unwrap();

        let loader = PolicyLoader::new(dir.path());
        assert_eq!(loader.load_all(), 2);

        assert!(loader.get("acme").unwrap().default_deny);
        assert!(loader.get("globex").is_some());
        assert!(loader.get("notes").is_none());
    }

    #[test]
    fn test_missing_dir_yields_nothing() {
        let loader = PolicyLoader::new("/nonexistent/notif-policies");
        assert_eq!(loader.load_all(), 0);
        assert_eq!(loader.count(), 0);
    }

    #[test]
    fn test_parse_error_keeps_old_policy() {
        let dir = tempfile::tempdir().unwrap();
        write_policy(dir.path(), "acme", "default_deny: true\ntopics: []\n");

        let loader = PolicyLoader::new(dir.path());
        loader.load_all();
        assert!(loader.get("acme").unwrap().default_deny);

        // Corrupt the file; reload must keep the old version
        write_policy(dir.path(), "acme", "default_deny: [broken");
        loader.load_all();
        assert!(loader.get("acme").unwrap().default_deny);
    }

    #[test]
    fn test_removed_file_drops_policy() {
        let dir = tempfile::tempdir().unwrap();
        write_policy(dir.path(), "acme", "topics: []\n");

        let loader = PolicyLoader::new(dir.path());
        loader.load_all();
        assert!(loader.get("acme").is_some());

        std::fs::remove_file(dir.path().join("acme.yaml")).unwrap();
        loader.load_all();
        assert!(loader.get("acme").is_none());
    }
}
