//! Toolchain environment cache (§4.4): auto-detect a pre-built Python
//! virtualenv under the shared cache root so Python/`python_gpu` runs don't
//! pay a `pip install` per request.
//!
//! Kept from the teacher's `environment.rs` almost unchanged — venv
//! auto-detection was already exactly the kind of "shared, read-only
//! toolchain cache" concern §4.4 asks every adapter to have; only the
//! doc comments and the entry point (`python_env_vars`, consumed by
//! `adapters::python_plan`) are new.

use std::fs;
use std::path::PathBuf;

/// Find the site-packages directory for the project's virtual environment.
///
/// Search order:
/// 1. $VIRTUAL_ENV environment variable (set by activated venvs)
/// 2. .venv directory in the project root
/// 3. venv directory in the project root
pub fn find_site_packages(project_root: &PathBuf) -> Option<PathBuf> {
    if let Ok(venv) = std::env::var("VIRTUAL_ENV") {
        let venv_path = PathBuf::from(venv);
        if let Some(sp) = find_site_packages_in_venv(&venv_path) {
            return Some(sp);
        }
    }

    let local_venv = project_root.join(".venv");
    if local_venv.exists() {
        if let Some(sp) = find_site_packages_in_venv(&local_venv) {
            return Some(sp);
        }
    }

    let alt_venv = project_root.join("venv");
    if alt_venv.exists() {
        if let Some(sp) = find_site_packages_in_venv(&alt_venv) {
            return Some(sp);
        }
    }

    None
}

/// Find site-packages within a virtual environment directory.
/// Linux/macOS: lib/pythonX.Y/site-packages
fn find_site_packages_in_venv(venv: &PathBuf) -> Option<PathBuf> {
    let lib = venv.join("lib");
    if !lib.exists() {
        return None;
    }

    if let Ok(entries) = fs::read_dir(&lib) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(name) = path.file_name() {
                    let name_str = name.to_string_lossy();
                    if name_str.starts_with("python") {
                        let site = path.join("site-packages");
                        if site.exists() {
                            return Some(site);
                        }
                    }
                }
            }
        }
    }

    None
}

/// Get all Python paths that should be prepended to sys.path.
/// Returns (project_root, site_packages) where site_packages may be None.
pub fn get_python_paths(project_root: &PathBuf) -> (PathBuf, Option<PathBuf>) {
    let site_packages = find_site_packages(project_root);
    (project_root.clone(), site_packages)
}

/// `PYTHONPATH` env var for a Python/`python_gpu` run, if a pre-built venv
/// was found under `shared_cache_root/python` (§4.4 toolchain env cache).
pub fn python_env_vars(shared_cache_root: &std::path::Path) -> Vec<(String, String)> {
    let root = shared_cache_root.join("python");
    match find_site_packages(&root) {
        Some(site_packages) => vec![("PYTHONPATH".to_string(), site_packages.display().to_string())],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_find_site_packages_with_venv() {
        let temp = tempdir().unwrap();
        let venv = temp.path().join(".venv");

        let site_packages = venv.join("lib/python3.12/site-packages");
        fs::create_dir_all(&site_packages).unwrap();

        let project_root = temp.path().to_path_buf();
        let result = find_site_packages(&project_root);

        assert!(result.is_some());
        assert!(result.unwrap().ends_with("site-packages"));
    }

    #[test]
    fn test_find_site_packages_no_venv() {
        let temp = tempdir().unwrap();
        let project_root = temp.path().to_path_buf();

        let result = find_site_packages(&project_root);
        assert!(result.is_none());
    }

    #[test]
    fn test_virtual_env_takes_priority() {
        let temp = tempdir().unwrap();

        let local_venv = temp.path().join(".venv/lib/python3.11/site-packages");
        fs::create_dir_all(&local_venv).unwrap();

        let external_venv = temp.path().join("external_venv");
        let external_site = external_venv.join("lib/python3.12/site-packages");
        fs::create_dir_all(&external_site).unwrap();

        std::env::set_var("VIRTUAL_ENV", external_venv.to_string_lossy().to_string());

        let project_root = temp.path().to_path_buf();
        let result = find_site_packages(&project_root);

        assert!(result.is_some());
        let result_path = result.unwrap();
        assert!(result_path.to_string_lossy().contains("external_venv"));

        std::env::remove_var("VIRTUAL_ENV");
    }

    #[test]
    fn python_env_vars_empty_without_a_cached_venv() {
        let temp = tempdir().unwrap();
        assert!(python_env_vars(temp.path()).is_empty());
    }
}
