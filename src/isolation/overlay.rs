//! Ephemeral overlay rootfs (§4.1 "Ephemeral root (lite only)").
//!
//! Adapted from the teacher's `isolation.rs::setup_filesystem`: a tmpfs
//! carries `upper`/`work`, the host root is the `lowerdir`, the merged dir
//! is the sandbox root. The teacher mounted the overlay directly onto `/`
//! and the project root in-place (single long-lived worker); here each
//! request gets its own merged root under `/run/sandbox-engine/<id>` so
//! many requests can be torn down independently and concurrently.

use anyhow::{Context, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Where the merged root for a given namespace/request id lives.
pub fn root_for(id: &str) -> PathBuf {
    PathBuf::from(format!("/run/sandbox-engine/{id}/root"))
}

/// Build a fresh overlay rootfs for one request: tmpfs for upper/work,
/// host `/` as lowerdir, `/proc`/`/sys`/`/dev` bound in, `/etc/hosts` and
/// `/etc/resolv.conf` copied so DNS keeps working inside the chroot.
pub fn setup(id: &str) -> Result<PathBuf> {
    let base = PathBuf::from(format!("/run/sandbox-engine/{id}"));
    let upper = base.join("upper");
    let work = base.join("work");
    let root = base.join("root");
    for dir in [&upper, &work, &root] {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    mount::<str, PathBuf, str, str>(
        Some("tmpfs"),
        &base,
        Some("tmpfs"),
        MsFlags::empty(),
        Some("mode=0755"),
    )
    .context("mounting tmpfs for overlay scratch space")?;

    let opts = format!(
        "lowerdir=/,upperdir={},workdir={}",
        upper.display(),
        work.display()
    );
    mount::<str, PathBuf, str, str>(Some("overlay"), &root, Some("overlay"), MsFlags::empty(), Some(&opts))
        .context("mounting overlayfs root")?;

    mount::<str, PathBuf, str, str>(Some("proc"), &root.join("proc"), Some("proc"), MsFlags::empty(), None)
        .context("mounting /proc")?;
    mount::<str, PathBuf, str, str>(Some("sysfs"), &root.join("sys"), Some("sysfs"), MsFlags::empty(), None)
        .context("mounting /sys")?;
    mount::<str, PathBuf, str, str>(Some("/dev"), &root.join("dev"), None, MsFlags::MS_BIND, None)
        .context("bind-mounting /dev")?;

    let _ = fs::copy("/etc/hosts", root.join("etc/hosts"));
    let _ = fs::copy("/etc/resolv.conf", root.join("etc/resolv.conf"));

    Ok(root)
}

/// Unmount in reverse order and remove the scratch dir. Each step's
/// failure is collected but does not prevent the others from running
/// (§4.1: "Failures in individual unmounts must not abort the other
/// cleanups").
pub fn teardown(id: &str) -> Result<()> {
    let base = PathBuf::from(format!("/run/sandbox-engine/{id}"));
    let root = base.join("root");

    let mut last_err = None;
    for sub in ["dev", "sys", "proc"] {
        if let Err(e) = umount2(&root.join(sub), MntFlags::MNT_DETACH) {
            last_err = Some(e);
        }
    }
    if let Err(e) = umount2(&root, MntFlags::MNT_DETACH) {
        last_err = Some(e);
    }
    if let Err(e) = umount2(&base, MntFlags::MNT_DETACH) {
        last_err = Some(e);
    }

    if base.exists() {
        fs::remove_dir_all(&base).context("removing overlay scratch dir")?;
    }

    if let Some(e) = last_err {
        anyhow::bail!("one or more overlay unmounts failed (removal still proceeded): {e}");
    }
    Ok(())
}

/// Bring up the loopback interface inside the current network namespace
/// (run after `unshare(CLONE_NEWNET)`, mirrors the teacher's
/// `setup_loopback`).
pub fn bring_up_loopback() -> Result<()> {
    let output = Command::new("ip")
        .args(["link", "set", "lo", "up"])
        .output()
        .context("failed to execute 'ip' — is iproute2 installed?")?;
    if !output.status.success() {
        anyhow::bail!(
            "'ip link set lo up' failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_for_is_scoped_by_id() {
        assert_ne!(root_for("a"), root_for("b"));
        assert!(root_for("a").starts_with("/run/sandbox-engine"));
    }
}
