//! Tracking-decorated Docker backend.
//!
//! Wraps a [`DockerBackend`] so that container lifecycle transitions and
//! image builds are recorded into repositories. Tracking is a best-effort
//! side channel: the decorator delegates first, records only when the
//! underlying operation succeeded, and drops every tracking failure after
//! logging it. The delegate's result is returned unchanged no matter
//! what the repositories do.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use cpflow_types::{DockerOptions, OperationResult};
use cpflow_util::short_content_hash;

use crate::drivers::docker::DockerBackend;

/// Failure of a tracking repository call. Never escapes the decorator.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking repository rejected update: {0}")]
    Repository(String),
}

/// Persists container status and lifecycle events.
pub trait ContainerRepository: Send + Sync {
    fn update_container_status(&self, name: &str, status: &str, timestamp_field: &str) -> Result<(), TrackingError>;
    fn add_lifecycle_event(&self, name: &str, event: &str, details: Option<Value>) -> Result<(), TrackingError>;
    fn update_container_id(&self, name: &str, container_id: &str) -> Result<(), TrackingError>;
    fn mark_container_removed(&self, name: &str) -> Result<(), TrackingError>;
}

/// Persists image build metadata.
pub trait ImageRepository: Send + Sync {
    fn create_or_update_image(
        &self,
        name: &str,
        tag: &str,
        dockerfile_hash: &str,
        build_command: &str,
        build_status: &str,
    ) -> Result<(), TrackingError>;
    fn update_image_build_result(
        &self,
        name: &str,
        tag: &str,
        image_id: Option<&str>,
        build_status: &str,
        build_time_ms: u64,
        size_bytes: Option<u64>,
    ) -> Result<(), TrackingError>;
    fn delete_image(&self, name: &str, tag: &str) -> Result<(), TrackingError>;
}

/// Logs and discards a tracking outcome. Keeping the drop explicit at
/// every call site is the point: observability must never become a
/// reliability hazard.
fn note_tracking(outcome: Result<(), TrackingError>) {
    if let Err(error) = outcome {
        debug!(%error, "tracking update dropped");
    }
}

static IMAGE_ID_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Successfully built ([0-9a-f]+)").expect("image id pattern compiles"));

/// Extracts the built image id from classic `docker build` output, when
/// present. Absence is not an error.
fn scrape_image_id(stdout: &str) -> Option<String> {
    IMAGE_ID_LINE.captures(stdout).map(|captures| captures[1].to_string())
}

/// Splits `name[:tag]`, defaulting the tag to `latest`.
fn split_image_reference(image: &str) -> (&str, &str) {
    match image.split_once(':') {
        Some((name, tag)) => (name, tag),
        None => (image, "latest"),
    }
}

/// Decorator recording lifecycle and build events around a delegate
/// backend.
pub struct TrackedDockerDriver {
    inner: Arc<dyn DockerBackend>,
    containers: Arc<dyn ContainerRepository>,
    images: Arc<dyn ImageRepository>,
}

impl TrackedDockerDriver {
    pub fn new(inner: Arc<dyn DockerBackend>, containers: Arc<dyn ContainerRepository>, images: Arc<dyn ImageRepository>) -> Self {
        Self { inner, containers, images }
    }
}

impl DockerBackend for TrackedDockerDriver {
    fn run_container(&self, image: &str, name: Option<&str>, options: &DockerOptions, command: &[String]) -> OperationResult {
        let result = self.inner.run_container(image, name, options, command);
        if result.success
            && let Some(name) = name
        {
            note_tracking(self.containers.update_container_status(name, "running", "started_at"));
            note_tracking(self.containers.add_lifecycle_event(name, "started", Some(json!({ "image": image }))));
            let container_id = result.stdout.trim();
            if container_id.len() == 64 && container_id.chars().all(|c| c.is_ascii_hexdigit()) {
                note_tracking(self.containers.update_container_id(name, container_id));
            }
        }
        result
    }

    fn stop_container(&self, name: &str, timeout_secs: u64) -> OperationResult {
        let result = self.inner.stop_container(name, timeout_secs);
        if result.success {
            note_tracking(self.containers.update_container_status(name, "stopped", "stopped_at"));
            note_tracking(self.containers.add_lifecycle_event(name, "stopped", None));
        }
        result
    }

    fn remove_container(&self, name: &str, force: bool) -> OperationResult {
        let result = self.inner.remove_container(name, force);
        if result.success {
            note_tracking(self.containers.mark_container_removed(name));
            note_tracking(self.containers.add_lifecycle_event(name, "removed", None));
        }
        result
    }

    fn exec_in_container(&self, name: &str, command: &[String], workdir: Option<&str>) -> OperationResult {
        self.inner.exec_in_container(name, command, workdir)
    }

    fn build_image(&self, dockerfile_text: &str, tag: &str) -> OperationResult {
        let dockerfile_hash = short_content_hash(dockerfile_text);
        note_tracking(self.images.create_or_update_image(
            tag,
            "latest",
            &dockerfile_hash,
            &format!("docker build -t {tag}"),
            "building",
        ));

        let started = Instant::now();
        let result = self.inner.build_image(dockerfile_text, tag);
        let build_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if result.success {
            let image_id = scrape_image_id(&result.stdout);
            note_tracking(
                self.images
                    .update_image_build_result(tag, "latest", image_id.as_deref(), "success", build_time_ms, None),
            );
        } else {
            note_tracking(self.images.update_image_build_result(tag, "latest", None, "failed", build_time_ms, None));
        }
        result
    }

    fn image_rm(&self, image: &str) -> OperationResult {
        let result = self.inner.image_rm(image);
        if result.success {
            let (name, tag) = split_image_reference(image);
            note_tracking(self.images.delete_image(name, tag));
        }
        result
    }

    fn ps(&self, all: bool, names_only: bool) -> OperationResult {
        self.inner.ps(all, names_only)
    }

    fn inspect(&self, target: &str) -> OperationResult {
        self.inner.inspect(target)
    }

    fn logs(&self, name: &str) -> OperationResult {
        self.inner.logs(name)
    }

    fn cp(&self, src: &Path, dst: &Path, container: &str, to_container: bool) -> OperationResult {
        self.inner.cp(src, dst, container, to_container)
    }
}

/// One recorded lifecycle event (for in-memory tracking and tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRecord {
    pub container: String,
    pub event: String,
    pub recorded_at: String,
}

/// In-memory container repository, the default wiring when no external
/// store is configured.
#[derive(Debug, Default)]
pub struct InMemoryContainerRepository {
    statuses: Mutex<HashMap<String, String>>,
    container_ids: Mutex<HashMap<String, String>>,
    events: Mutex<Vec<LifecycleRecord>>,
}

impl InMemoryContainerRepository {
    pub fn status_of(&self, name: &str) -> Option<String> {
        self.statuses.lock().expect("status lock poisoned").get(name).cloned()
    }

    pub fn events(&self) -> Vec<LifecycleRecord> {
        self.events.lock().expect("event lock poisoned").clone()
    }
}

impl ContainerRepository for InMemoryContainerRepository {
    fn update_container_status(&self, name: &str, status: &str, _timestamp_field: &str) -> Result<(), TrackingError> {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(name.to_string(), status.to_string());
        Ok(())
    }

    fn add_lifecycle_event(&self, name: &str, event: &str, _details: Option<Value>) -> Result<(), TrackingError> {
        self.events.lock().expect("event lock poisoned").push(LifecycleRecord {
            container: name.to_string(),
            event: event.to_string(),
            recorded_at: Utc::now().to_rfc3339(),
        });
        Ok(())
    }

    fn update_container_id(&self, name: &str, container_id: &str) -> Result<(), TrackingError> {
        self.container_ids
            .lock()
            .expect("id lock poisoned")
            .insert(name.to_string(), container_id.to_string());
        Ok(())
    }

    fn mark_container_removed(&self, name: &str) -> Result<(), TrackingError> {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(name.to_string(), "removed".to_string());
        Ok(())
    }
}

/// Image metadata row kept by the in-memory repository.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageRecord {
    pub dockerfile_hash: String,
    pub build_status: String,
    pub image_id: Option<String>,
    pub build_time_ms: Option<u64>,
}

/// In-memory image repository.
#[derive(Debug, Default)]
pub struct InMemoryImageRepository {
    images: Mutex<HashMap<(String, String), ImageRecord>>,
}

impl InMemoryImageRepository {
    pub fn record_of(&self, name: &str, tag: &str) -> Option<ImageRecord> {
        self.images
            .lock()
            .expect("image lock poisoned")
            .get(&(name.to_string(), tag.to_string()))
            .cloned()
    }
}

impl ImageRepository for InMemoryImageRepository {
    fn create_or_update_image(
        &self,
        name: &str,
        tag: &str,
        dockerfile_hash: &str,
        _build_command: &str,
        build_status: &str,
    ) -> Result<(), TrackingError> {
        let mut images = self.images.lock().expect("image lock poisoned");
        let record = images.entry((name.to_string(), tag.to_string())).or_default();
        record.dockerfile_hash = dockerfile_hash.to_string();
        record.build_status = build_status.to_string();
        Ok(())
    }

    fn update_image_build_result(
        &self,
        name: &str,
        tag: &str,
        image_id: Option<&str>,
        build_status: &str,
        build_time_ms: u64,
        _size_bytes: Option<u64>,
    ) -> Result<(), TrackingError> {
        let mut images = self.images.lock().expect("image lock poisoned");
        let record = images.entry((name.to_string(), tag.to_string())).or_default();
        record.build_status = build_status.to_string();
        record.image_id = image_id.map(ToString::to_string);
        record.build_time_ms = Some(build_time_ms);
        Ok(())
    }

    fn delete_image(&self, name: &str, tag: &str) -> Result<(), TrackingError> {
        self.images
            .lock()
            .expect("image lock poisoned")
            .remove(&(name.to_string(), tag.to_string()));
        Ok(())
    }
}
