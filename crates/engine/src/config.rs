//! Layered configuration resolution.
//!
//! Configuration arrives as a stack of YAML or JSON files (system, user,
//! project) deep-merged object-by-object, later layers overriding earlier
//! ones. The engine only ever queries the merged tree by ordered key
//! paths; a missing segment fails naming exactly which segment was not
//! found, which keeps "your config is wrong" errors actionable.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use cpflow_types::StepDescriptor;

/// Merged view over the configuration layers.
#[derive(Debug, Clone, Default)]
pub struct LayeredConfig {
    root: Value,
}

impl LayeredConfig {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Loads and merges the given files in order. Files that do not exist
    /// are skipped; unreadable or unparsable files are errors.
    pub fn from_layers(paths: &[impl AsRef<Path>]) -> Result<Self> {
        let mut root = Value::Object(serde_json::Map::new());
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let layer = load_config_file(path)?;
            merge_value(&mut root, layer);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolves an ordered key path, failing with the first unresolved
    /// segment named.
    pub fn lookup(&self, path: &[&str]) -> Result<&Value> {
        let mut current = &self.root;
        for (index, segment) in path.iter().enumerate() {
            match current.get(segment) {
                Some(next) => current = next,
                None => bail!(
                    "config path '{}' not found: segment '{}' is missing",
                    path[..=index].join("."),
                    segment
                ),
            }
        }
        Ok(current)
    }

    /// Convenience string lookup returning `None` when absent or not a
    /// string.
    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.lookup(path).ok().and_then(Value::as_str)
    }

    /// The ordered step descriptors configured for `(language, command)`.
    pub fn steps_for(&self, language: &str, command: &str) -> Result<Vec<StepDescriptor>> {
        let steps_value = self
            .lookup(&[language, "commands", command, "steps"])
            .with_context(|| format!("no workflow steps configured for command '{command}' (language '{language}')"))?;
        let steps: Vec<StepDescriptor> = serde_json::from_value(steps_value.clone())
            .with_context(|| format!("invalid step list for command '{command}' (language '{language}')"))?;
        Ok(steps)
    }
}

/// Reads a single config file, detecting the format from the extension.
/// Extensionless files are parsed as YAML, which also accepts JSON.
pub fn load_config_file(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read config file: {}", path.display()))?;
    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?,
        _ => serde_yaml::from_str(&raw).with_context(|| format!("invalid YAML in {}", path.display()))?,
    };
    Ok(parsed)
}

/// Deep merge: objects merge key-by-key, everything else is replaced by
/// the overlay.
pub fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_value(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> LayeredConfig {
        LayeredConfig::from_value(json!({
            "rust": {
                "commands": {
                    "test": {
                        "steps": [
                            {"type": "copy", "cmd": ["template/main.rs", "{contest_name}/{problem_name}/main.rs"]},
                            {"type": "shell", "cmd": ["cargo", "test"], "allow_failure": true}
                        ]
                    }
                }
            }
        }))
    }

    #[test]
    fn steps_for_returns_ordered_descriptors() {
        let steps = config().steps_for("rust", "test").expect("steps resolve");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].cmd[0], "template/main.rs");
        assert!(steps[1].allow_failure);
    }

    #[test]
    fn steps_for_names_the_missing_command() {
        let error = config().steps_for("rust", "submit").expect_err("missing command");
        let message = format!("{error:#}");
        assert!(message.contains("command 'submit'"), "unexpected error: {message}");
        assert!(message.contains("segment 'submit'"), "unexpected error: {message}");
    }

    #[test]
    fn lookup_names_the_first_unresolved_segment() {
        let error = config().lookup(&["python", "commands"]).expect_err("missing language");
        assert!(error.to_string().contains("segment 'python'"), "unexpected error: {error}");
    }

    #[test]
    fn merge_overrides_scalars_and_merges_objects() {
        let mut base = json!({
            "rust": {"commands": {"test": {"steps": []}}, "timeout": 300}
        });
        merge_value(
            &mut base,
            json!({
                "rust": {"timeout": 60},
                "python": {"commands": {}}
            }),
        );
        assert_eq!(base["rust"]["timeout"], 60);
        assert!(base["rust"]["commands"]["test"]["steps"].is_array());
        assert!(base["python"]["commands"].is_object());
    }

    #[test]
    fn from_layers_skips_missing_files_and_merges_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let system = dir.path().join("system.yaml");
        let project = dir.path().join("project.json");
        fs::write(&system, "rust:\n  timeout: 300\n").expect("write system layer");
        fs::write(&project, r#"{"rust": {"timeout": 10}}"#).expect("write project layer");

        let config = LayeredConfig::from_layers(&[system.as_path(), dir.path().join("absent.yaml").as_path(), project.as_path()])
            .expect("layers load");
        assert_eq!(config.lookup(&["rust", "timeout"]).expect("timeout").as_i64(), Some(10));
    }
}
