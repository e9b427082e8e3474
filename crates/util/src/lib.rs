//! Small leaf utilities shared across the cpflow workspace: content
//! hashing, workspace path classification, and deterministic Docker
//! naming.

mod hashing;
mod naming;
mod workspace;

pub use hashing::short_content_hash;
pub use naming::{container_name, image_name, oj_container_name, oj_image_name};
pub use workspace::WorkspaceChecker;

use std::path::PathBuf;

use dirs_next::home_dir;

/// Expands a leading `~` or `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}
