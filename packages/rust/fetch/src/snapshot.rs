//! JSON snapshot files.

use std::path::Path;

use tracing::{debug, instrument};

use dossier_shared::{DossierError, FetchError, ProjectSnapshot};

/// Load a snapshot written by [`save_snapshot`] or produced by hand.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_snapshot(path: &Path) -> Result<ProjectSnapshot, FetchError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
        _ => FetchError::Invalid(format!("{}: {e}", path.display())),
    })?;

    let snapshot: ProjectSnapshot = serde_json::from_str(&content)
        .map_err(|e| FetchError::Invalid(format!("{}: {e}", path.display())))?;

    debug!(root = %snapshot.root, nodes = snapshot.len(), "snapshot loaded");
    Ok(snapshot)
}

/// Write a snapshot as pretty-printed JSON, creating parent directories.
pub fn save_snapshot(path: &Path, snapshot: &ProjectSnapshot) -> dossier_shared::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DossierError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| DossierError::parse(format!("failed to serialize snapshot: {e}")))?;
    std::fs::write(path, json).map_err(|e| DossierError::io(path, e))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use dossier_shared::{NodeKind, Payload, ProjectNode};

    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("dossier-snapshot-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn loads_fixture() {
        let snapshot = load_snapshot(Path::new("../../../fixtures/json/project.fixture.json"))
            .expect("load fixture");
        assert_eq!(snapshot.root.as_str(), "kzc68");
        assert!(snapshot.len() >= 6);
    }

    #[test]
    fn save_then_load() {
        let dir = temp_dir();
        let path = dir.join("nested/snapshot.json");
        let snapshot = ProjectSnapshot::new(
            "P",
            [
                ProjectNode::new("P", "Study", NodeKind::Project).with_children(["W"]),
                ProjectNode::new("W", "Home", NodeKind::WikiPage)
                    .with_parent("P")
                    .with_payload(Payload::markdown("Hello")),
            ],
        );

        save_snapshot(&path, &snapshot).expect("save");
        let loaded = load_snapshot(&path).expect("load");
        assert_eq!(loaded, snapshot);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load_snapshot(&temp_dir().join("absent.json")).unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[test]
    fn bad_json_is_invalid() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("broken.json");
        std::fs::write(&path, "{ \"root\": ").expect("write");

        let err = load_snapshot(&path).unwrap_err();
        assert!(matches!(err, FetchError::Invalid(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn duplicate_ids_are_invalid() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("dupes.json");
        std::fs::write(
            &path,
            r#"{ "root": "A", "nodes": [
                { "id": "A", "title": "One", "kind": "project" },
                { "id": "A", "title": "Two", "kind": "project" }
            ] }"#,
        )
        .expect("write");

        let err = load_snapshot(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate node id"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
