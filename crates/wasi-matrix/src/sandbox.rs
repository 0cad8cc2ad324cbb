//! Per-cell sandbox provisioning.
//!
//! Every (test, adapter) execution gets a fresh, uniquely named directory
//! seeded with a copy of the shared fixture tree. Directories are never
//! reused and are removed on drop unless explicitly retained.

use chrono::Utc;
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ProvisionError;

static PROVISION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handle to one isolated working directory. Owns the directory for the
/// cell's lifetime; the tree is deleted on every exit path unless
/// [`Sandbox::retain`] was called.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    retained: bool,
}

impl Sandbox {
    /// Create a fresh sandbox seeded with a recursive copy of
    /// `fixture_source` under its base name.
    pub fn provision(fixture_source: &Path) -> Result<Self, ProvisionError> {
        let root = create_unique_root()?;
        let sandbox = Sandbox {
            root,
            retained: false,
        };
        let target = match fixture_source.file_name() {
            Some(name) => sandbox.root.join(name),
            None => sandbox.root.clone(),
        };
        // Drop of the partially built sandbox cleans up on copy failure.
        copy_tree(fixture_source, &target)?;
        Ok(sandbox)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a spec's host-side preopen path. Relative paths are grants
    /// inside the sandbox.
    pub fn resolve(&self, host_path: &str) -> PathBuf {
        let path = Path::new(host_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Keep the directory after drop for post-mortem inspection.
    pub fn retain(&mut self) {
        self.retained = true;
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.retained {
            let _ = fs::remove_dir_all(&self.root);
        }
    }
}

fn create_unique_root() -> io::Result<PathBuf> {
    let base = std::env::temp_dir();
    loop {
        let seq = PROVISION_SEQ.fetch_add(1, Ordering::Relaxed);
        let candidate = base.join(format!(
            "wasi_matrix_{}_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros(),
            seq
        ));
        // create_dir is the uniqueness check: a concurrent provision that
        // raced to the same name loses and retries.
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Recursive copy that reproduces symlinks verbatim instead of resolving
/// them: parts of the corpus exercise the guest filesystem layer's symlink
/// traversal, so the sandbox must present the same link topology as the
/// fixture source.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| entry.path());
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            symlink(&link, &target)?;
            #[cfg(not(unix))]
            {
                let _ = link;
            }
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_tree(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "wasi_matrix_fixture_test_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(dir.join("nested")).expect("fixture dirs");
        fs::write(dir.join("data.txt"), b"payload").expect("fixture file");
        fs::write(dir.join("nested/inner.txt"), b"inner").expect("fixture file");
        dir
    }

    #[test]
    fn provisions_copy_of_fixture_tree() {
        let fixtures = fixture_tree("copy");
        let sandbox = Sandbox::provision(&fixtures).expect("provision");
        let copied = sandbox.root().join(fixtures.file_name().expect("name"));
        assert_eq!(fs::read(copied.join("data.txt")).expect("read"), b"payload");
        assert_eq!(
            fs::read(copied.join("nested/inner.txt")).expect("read"),
            b"inner"
        );
        let _ = fs::remove_dir_all(fixtures);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_preserved_not_resolved() {
        let fixtures = fixture_tree("symlink");
        symlink("data.txt", fixtures.join("link.txt")).expect("make link");
        let sandbox = Sandbox::provision(&fixtures).expect("provision");
        let copied = sandbox.root().join(fixtures.file_name().expect("name"));
        let meta = fs::symlink_metadata(copied.join("link.txt")).expect("metadata");
        assert!(meta.file_type().is_symlink(), "copy must stay a link");
        assert_eq!(
            fs::read_link(copied.join("link.txt")).expect("read link"),
            PathBuf::from("data.txt")
        );
        let _ = fs::remove_dir_all(fixtures);
    }

    #[test]
    fn concurrent_provisions_never_share_a_directory() {
        let fixtures = fixture_tree("isolation");
        let a = Sandbox::provision(&fixtures).expect("provision a");
        let b = Sandbox::provision(&fixtures).expect("provision b");
        assert_ne!(a.root(), b.root());
        fs::write(a.root().join("scratch.txt"), b"a only").expect("write");
        assert!(!b.root().join("scratch.txt").exists());
        let _ = fs::remove_dir_all(fixtures);
    }

    #[test]
    fn drop_removes_the_tree() {
        let fixtures = fixture_tree("drop");
        let root = {
            let sandbox = Sandbox::provision(&fixtures).expect("provision");
            sandbox.root().to_path_buf()
        };
        assert!(!root.exists(), "dropped sandbox must be deleted");
        let _ = fs::remove_dir_all(fixtures);
    }

    #[test]
    fn retained_sandbox_survives_drop() {
        let fixtures = fixture_tree("retain");
        let root = {
            let mut sandbox = Sandbox::provision(&fixtures).expect("provision");
            sandbox.retain();
            sandbox.root().to_path_buf()
        };
        assert!(root.exists(), "retained sandbox must survive");
        let _ = fs::remove_dir_all(root);
        let _ = fs::remove_dir_all(fixtures);
    }

    #[test]
    fn missing_fixture_source_is_a_provision_error() {
        let ghost = std::env::temp_dir().join(format!(
            "wasi_matrix_ghost_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        assert!(Sandbox::provision(&ghost).is_err());
    }

    #[test]
    fn resolve_keeps_absolute_and_anchors_relative() {
        let fixtures = fixture_tree("resolve");
        let sandbox = Sandbox::provision(&fixtures).expect("provision");
        assert_eq!(
            sandbox.resolve("/etc/hosts"),
            PathBuf::from("/etc/hosts")
        );
        assert_eq!(
            sandbox.resolve("fixtures/data"),
            sandbox.root().join("fixtures/data")
        );
        let _ = fs::remove_dir_all(fixtures);
    }
}
