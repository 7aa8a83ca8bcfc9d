use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::KiraError;

/// Maps remote file paths onto the local output tree.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: Utf8PathBuf,
    conserve_structure: bool,
}

impl OutputLayout {
    pub fn new(root: Utf8PathBuf, conserve_structure: bool) -> Self {
        Self {
            root,
            conserve_structure,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn conserve_structure(&self) -> bool {
        self.conserve_structure
    }

    pub fn resolve(&self, remote_path: &str, prefix: &str) -> Result<Utf8PathBuf, KiraError> {
        resolve_output_path(remote_path, self.conserve_structure, &self.root, prefix)
    }

    /// Resolves the path and creates its missing parent directories.
    pub fn prepare(&self, remote_path: &str, prefix: &str) -> Result<Utf8PathBuf, KiraError> {
        let path = self.resolve(remote_path, prefix)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(format!("create {parent}: {err}")))?;
        }
        Ok(path)
    }
}

/// `root/prefix/<name>` when flattening, `root/prefix/<path minus its first
/// segment>` when conserving structure. Flattened names from different remote
/// directories can collide; the last file written wins.
pub fn resolve_output_path(
    remote_path: &str,
    conserve_structure: bool,
    root: &Utf8Path,
    prefix: &str,
) -> Result<Utf8PathBuf, KiraError> {
    let segments = safe_segments(remote_path)?;
    let prefix_segments = safe_segments(prefix)?;

    let mut path = root.to_path_buf();
    for segment in prefix_segments {
        path.push(segment);
    }

    let kept = if conserve_structure && segments.len() > 1 {
        &segments[1..]
    } else {
        &segments[segments.len() - 1..]
    };
    for segment in kept {
        path.push(segment);
    }
    Ok(path)
}

fn safe_segments(path: &str) -> Result<Vec<&str>, KiraError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(KiraError::ServiceContract(format!(
            "empty remote path: {path:?}"
        )));
    }
    if segments
        .iter()
        .any(|s| *s == "." || *s == ".." || s.contains('\\') || has_drive_prefix(s))
    {
        return Err(KiraError::ServiceContract(format!(
            "remote path traversal detected: {path}"
        )));
    }
    Ok(segments)
}

/// `C:` style prefixes would escape the output root on Windows.
fn has_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
