//! Deterministic Docker image and container naming.
//!
//! Container names embed the Dockerfile content hash so that editing a
//! Dockerfile naturally yields a new container name, with no manual cache
//! invalidation step. Image names stay stable per language; the rebuild
//! decision for images compares content hashes instead.

use crate::hashing::short_content_hash;

const NAME_PREFIX: &str = "cpflow";

pub fn image_name(language: &str) -> String {
    format!("{NAME_PREFIX}-{language}")
}

pub fn oj_image_name() -> String {
    format!("{NAME_PREFIX}-oj")
}

pub fn container_name(language: &str, dockerfile_content: Option<&str>) -> String {
    match dockerfile_content {
        Some(content) => format!("{NAME_PREFIX}-{language}-{}", short_content_hash(content)),
        None => format!("{NAME_PREFIX}-{language}"),
    }
}

pub fn oj_container_name(oj_dockerfile_content: Option<&str>) -> String {
    match oj_dockerfile_content {
        Some(content) => format!("{NAME_PREFIX}-oj-{}", short_content_hash(content)),
        None => format!("{NAME_PREFIX}-oj"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_tracks_dockerfile_content() {
        let before = container_name("rust", Some("FROM rust:1.88\n"));
        let after = container_name("rust", Some("FROM rust:1.89\n"));
        assert_ne!(before, after);
        assert!(before.starts_with("cpflow-rust-"));
    }

    #[test]
    fn container_name_without_content_is_stable() {
        assert_eq!(container_name("python", None), "cpflow-python");
        assert_eq!(oj_container_name(None), "cpflow-oj");
    }

    #[test]
    fn image_name_is_independent_of_content() {
        assert_eq!(image_name("rust"), "cpflow-rust");
        assert_eq!(oj_image_name(), "cpflow-oj");
    }
}
