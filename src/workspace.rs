//! Ephemeral per-request workspace materialization (§4.1 "Workspace",
//! §3 RunRequest.files / fetch_files).
//!
//! New module, grounded on `isobox`'s `FileManager::write_code_file` (plain
//! `fs::write` under a scratch dir, metadata check after write, best-effort
//! `remove_dir_all` on cleanup) generalized from "one code file" to the full
//! `files` map, plus the teacher's `anyhow::Context`-on-every-step idiom.

use anyhow::{Context, Result};
use base64::Engine as _;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::types::FileMap;

/// A file whose value is exactly this sentinel is skipped during
/// materialization rather than written as literal text (§3, §6).
pub const IGNORE_THIS_FILE: &str = "IGNORE_THIS_FILE";

/// Create a fresh scratch directory under `root` for one request.
pub fn create(root: &Path) -> Result<PathBuf> {
    let dir = root.join(format!("run-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).with_context(|| format!("creating workspace {}", dir.display()))?;
    Ok(dir)
}

/// Write every entry of `files` under `cwd`. Values are base64-encoded
/// (§3 RunRequest.files); `None` and `IGNORE_THIS_FILE` entries are skipped
/// so clients can submit a sparse overlay without deleting unrelated
/// requests' files (§3, §6 idempotent composition).
pub fn materialize(cwd: &Path, files: &FileMap) -> Result<()> {
    for (rel_path, value) in files {
        let Some(encoded) = value else {
            continue;
        };
        if encoded == IGNORE_THIS_FILE {
            continue;
        }
        let target = resolve_within(cwd, rel_path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", target.display()))?;
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .with_context(|| format!("base64-decoding {rel_path}"))?;
        std::fs::write(&target, &bytes).with_context(|| format!("writing {}", target.display()))?;
    }
    Ok(())
}

/// Read back every path in `fetch_files` relative to `cwd`, returning a
/// plain (non-base64) map of the files that existed. Missing files are
/// silently skipped rather than erroring: a test suite writing a subset of
/// its declared outputs is not an engine failure (§3, §6).
pub fn fetch(cwd: &Path, fetch_files: &[String]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for rel_path in fetch_files {
        let target = match resolve_within(cwd, rel_path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %rel_path, error = %e, "fetch_files path rejected");
                continue;
            }
        };
        match std::fs::read_to_string(&target) {
            Ok(content) => {
                out.insert(rel_path.clone(), content);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %rel_path, error = %e, "failed to read back fetch_files entry"),
        }
    }
    out
}

/// Reject any path that would escape `cwd` via `..` or an absolute
/// component — a request's `files`/`fetch_files` keys are untrusted input
/// (§7 trust boundary).
fn resolve_within(cwd: &Path, rel_path: &str) -> Result<PathBuf> {
    let candidate = Path::new(rel_path);
    if candidate.is_absolute() {
        anyhow::bail!("absolute paths are not allowed: {rel_path}");
    }
    if candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        anyhow::bail!("path traversal is not allowed: {rel_path}");
    }
    Ok(cwd.join(candidate))
}

/// In `none` isolation mode there is no chroot/overlay boundary, so the
/// workspace is instead hardened by dropping world/group write and running
/// the child under an unprivileged uid (§4.1 "none mode hardening", §9).
pub fn harden_for_none_mode(cwd: &Path, uid: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(cwd).context("stat workspace for hardening")?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(cwd, perms).context("chmod workspace for hardening")?;
    if let Some(uid) = uid {
        let uid = nix::unistd::Uid::from_raw(uid);
        nix::unistd::chown(cwd, Some(uid), None).context("chown workspace to unprivileged uid")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[test]
    fn materialize_writes_decoded_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileMap::new();
        files.insert("a.txt".to_string(), Some(b64("hello")));
        materialize(dir.path(), &files).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello");
    }

    #[test]
    fn materialize_skips_none_and_ignore_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileMap::new();
        files.insert("skip_none.txt".to_string(), None);
        files.insert("skip_ignored.txt".to_string(), Some(IGNORE_THIS_FILE.to_string()));
        materialize(dir.path(), &files).unwrap();
        assert!(!dir.path().join("skip_none.txt").exists());
        assert!(!dir.path().join("skip_ignored.txt").exists());
    }

    #[test]
    fn materialize_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileMap::new();
        files.insert("nested/dir/file.txt".to_string(), Some(b64("x")));
        materialize(dir.path(), &files).unwrap();
        assert!(dir.path().join("nested/dir/file.txt").exists());
    }

    #[test]
    fn fetch_returns_only_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "data").unwrap();
        let fetched = fetch(dir.path(), &["present.txt".to_string(), "missing.txt".to_string()]);
        assert_eq!(fetched.get("present.txt").unwrap(), "data");
        assert!(!fetched.contains_key("missing.txt"));
    }

    #[test]
    fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileMap::new();
        files.insert("../escape.txt".to_string(), Some(b64("x")));
        assert!(materialize(dir.path(), &files).is_err());
    }

    #[test]
    fn absolute_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = FileMap::new();
        files.insert("/etc/passwd".to_string(), Some(b64("x")));
        assert!(materialize(dir.path(), &files).is_err());
    }
}
