//! Docker state snapshots and rebuild decisions.

use serde::{Deserialize, Serialize};

use crate::step::EnvKind;

/// Fingerprint key under which a [`DockerStateInfo`] is stored.
pub fn state_key(language: &str, env: EnvKind) -> String {
    format!("{language}_{env}")
}

/// Snapshot of the Docker-relevant identity of an execution context at a
/// point in time: Dockerfile content hashes plus the derived image and
/// container names, for both the language environment and the
/// online-judge tooling environment.
///
/// Snapshots are derived (from the context and its Dockerfile resolver),
/// never hand-constructed, and immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerStateInfo {
    pub language: String,
    /// 12-hex-char truncated SHA-256 of the Dockerfile, `None` when no
    /// Dockerfile content exists.
    pub dockerfile_hash: Option<String>,
    pub oj_dockerfile_hash: Option<String>,
    pub image_name: String,
    pub oj_image_name: String,
    pub container_name: String,
    pub oj_container_name: String,
    /// ISO-8601 timestamp of when the snapshot was recorded.
    pub last_updated: String,
}

/// Outcome of comparing a live snapshot against the stored fingerprint.
///
/// Container recreation is always a derived consequence of an image
/// rebuild or identity-naming drift, never computed independently; the
/// state manager upholds that invariant when constructing this value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RebuildPlan {
    pub image_rebuild: bool,
    pub oj_image_rebuild: bool,
    pub container_recreate: bool,
    pub oj_container_recreate: bool,
}

impl RebuildPlan {
    /// Plan used when no prior record exists: everything is rebuilt.
    pub fn rebuild_everything() -> Self {
        Self {
            image_rebuild: true,
            oj_image_rebuild: true,
            container_recreate: true,
            oj_container_recreate: true,
        }
    }

    /// True when any preparation work is required.
    pub fn any_work(&self) -> bool {
        self.image_rebuild || self.oj_image_rebuild || self.container_recreate || self.oj_container_recreate
    }
}
