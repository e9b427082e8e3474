//! Docker state tracking and rebuild decisions.
//!
//! The manager persists, per `"{language}_{env}"` fingerprint, the last
//! known Dockerfile hashes and derived image/container names, and compares
//! a freshly derived snapshot against that record to decide whether the
//! image must be rebuilt and/or the container recreated. State tracking is
//! an optimization, not a correctness requirement: a missing, corrupt, or
//! unwritable state file degrades to "rebuild everything", it never blocks
//! a run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use cpflow_types::{DockerStateInfo, EnvKind, RebuildPlan, state_key};

use crate::context::ExecutionContext;
use crate::drivers::docker::{DockerBackend, parse_container_names};

/// Fingerprint-keyed store of [`DockerStateInfo`] records, cached in
/// memory and mirrored to an optional JSON file.
///
/// File writes are last-writer-wins with no cross-process locking; racing
/// workflow runs are a documented limitation, not a supported case.
#[derive(Debug)]
pub struct DockerStateManager {
    state_cache: Mutex<HashMap<String, DockerStateInfo>>,
    state_file_path: Option<PathBuf>,
}

impl DockerStateManager {
    /// Store that lives only in memory (dependency injection and tests).
    pub fn in_memory(initial_state: HashMap<String, DockerStateInfo>) -> Self {
        Self {
            state_cache: Mutex::new(initial_state),
            state_file_path: None,
        }
    }

    /// Store mirrored to `path`, loading whatever is there now. A missing
    /// or unreadable file is an empty store.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial_state = load_state_file(&path);
        Self {
            state_cache: Mutex::new(initial_state),
            state_file_path: Some(path),
        }
    }

    /// Derives the current state snapshot for a context, hashing live
    /// Dockerfile content through the context's resolver.
    pub fn snapshot(context: &ExecutionContext) -> DockerStateInfo {
        let names = context.docker_names();
        let dockerfile_hash = context.dockerfile_resolver.dockerfile().map(|content| cpflow_util::short_content_hash(&content));
        let oj_dockerfile_hash = context
            .dockerfile_resolver
            .oj_dockerfile()
            .map(|content| cpflow_util::short_content_hash(&content));
        DockerStateInfo {
            language: context.language.clone(),
            dockerfile_hash,
            oj_dockerfile_hash,
            image_name: names.image_name,
            oj_image_name: names.oj_image_name,
            container_name: names.container_name,
            oj_container_name: names.oj_container_name,
            last_updated: Utc::now().to_rfc3339(),
        }
    }

    /// Compares the live snapshot against the stored record.
    ///
    /// No stored record means everything is rebuilt. Otherwise each image
    /// rebuild flag follows its Dockerfile hash, and each container
    /// recreate flag is derived from the rebuild flag or naming drift,
    /// never computed independently, so "rebuilt image, stale container"
    /// cannot go undetected.
    pub fn check_rebuild_needed(&self, context: &ExecutionContext) -> RebuildPlan {
        let current = Self::snapshot(context);
        let key = state_key(&context.language, context.env);
        let cache = self.state_cache.lock().expect("state cache lock poisoned");

        let Some(stored) = cache.get(&key) else {
            debug!(%key, "no stored docker state; rebuilding everything");
            return RebuildPlan::rebuild_everything();
        };

        let image_rebuild = stored.dockerfile_hash != current.dockerfile_hash;
        let container_recreate =
            image_rebuild || stored.image_name != current.image_name || stored.container_name != current.container_name;

        let oj_image_rebuild = stored.oj_dockerfile_hash != current.oj_dockerfile_hash;
        let oj_container_recreate =
            oj_image_rebuild || stored.oj_image_name != current.oj_image_name || stored.oj_container_name != current.oj_container_name;

        RebuildPlan {
            image_rebuild,
            oj_image_rebuild,
            container_recreate,
            oj_container_recreate,
        }
    }

    /// Overwrites the stored record for the context's fingerprint with a
    /// fresh snapshot. Call only after the image/container actually
    /// reflect the new state; the manager performs no builds itself.
    pub fn update_state(&self, context: &ExecutionContext) {
        let key = state_key(&context.language, context.env);
        let mut cache = self.state_cache.lock().expect("state cache lock poisoned");
        cache.insert(key, Self::snapshot(context));
        self.save(&cache);
    }

    /// Removes one fingerprint's record, or every record when `None`.
    pub fn clear_state(&self, fingerprint: Option<(&str, EnvKind)>) {
        let mut cache = self.state_cache.lock().expect("state cache lock poisoned");
        match fingerprint {
            Some((language, env)) => {
                cache.remove(&state_key(language, env));
            }
            None => cache.clear(),
        }
        self.save(&cache);
    }

    /// The image name the current context is expected to run from.
    pub fn expected_image_name(context: &ExecutionContext, is_oj: bool) -> String {
        let snapshot = Self::snapshot(context);
        if is_oj { snapshot.oj_image_name } else { snapshot.image_name }
    }

    /// Secondary live check: confirms that `container_name`, if it exists,
    /// was created from `expected_image`. Catches drift the fingerprint
    /// file cannot see (containers started outside this tool). Every
    /// failure mode (container absent, command failure, malformed
    /// inspect output) degrades to "not compatible".
    pub fn inspect_container_compatibility(&self, docker: &dyn DockerBackend, container_name: &str, expected_image: &str) -> bool {
        let ps_result = docker.ps(true, true);
        if !ps_result.success {
            return false;
        }
        if !parse_container_names(&ps_result.stdout).iter().any(|name| name == container_name) {
            return false;
        }

        let inspect_result = docker.inspect(container_name);
        if !inspect_result.success {
            return false;
        }
        let Ok(parsed) = serde_json::from_str::<Value>(&inspect_result.stdout) else {
            return false;
        };
        let Some(container_image) = parsed
            .get(0)
            .and_then(|entry| entry.get("Config"))
            .and_then(|config| config.get("Image"))
            .and_then(Value::as_str)
        else {
            return false;
        };

        // The daemon may store the image with a tag or digest; containment
        // is the same check the fingerprint comparison would want.
        container_image.contains(expected_image)
    }

    fn save(&self, cache: &HashMap<String, DockerStateInfo>) {
        let Some(path) = &self.state_file_path else {
            return;
        };
        if let Err(error) = write_state_file(path, cache) {
            warn!(path = %path.display(), %error, "failed to persist docker state; continuing without persistence");
        }
    }
}

fn load_state_file(path: &Path) -> HashMap<String, DockerStateInfo> {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(error) => {
                warn!(path = %path.display(), %error, "corrupt docker state file; starting from an empty store");
                HashMap::new()
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
        Err(error) => {
            warn!(path = %path.display(), %error, "unreadable docker state file; starting from an empty store");
            HashMap::new()
        }
    }
}

fn write_state_file(path: &Path, state: &HashMap<String, DockerStateInfo>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(state)?;
    fs::write(path, data)?;
    Ok(())
}
