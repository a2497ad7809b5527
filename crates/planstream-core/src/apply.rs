//! Writing plan files into a project directory.
//!
//! Paths come from model output, so each one is checked to stay inside the
//! project root before anything is written. Every write is preceded by a
//! [`Snapshot`] of what was there, which lets a failed apply (or a failed
//! debug attempt) put the tree back as it was.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    error::{PlanError, Result},
    replace::CurrentPlanFiles,
};

/// Files written by one apply.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub written: Vec<PathBuf>,
    /// Of `written`, the files that did not exist before
    pub created: Vec<PathBuf>,
    snapshot: Snapshot,
}

impl ApplyReport {
    /// What the written files held before the apply.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }
}

/// Prior contents of files about to be overwritten. `None` marks a file
/// that did not exist.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl Snapshot {
    /// Records the current state of `path` unless it was already recorded.
    pub fn capture(&mut self, path: &Path) -> Result<()> {
        if self.entries.iter().any(|(p, _)| p == path) {
            return Ok(());
        }
        let previous = match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(PlanError::FileSystem {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        self.entries.push((path.to_path_buf(), previous));
        Ok(())
    }

    /// Adds the entries of a later snapshot for paths not yet recorded, so
    /// the earliest state of each file wins.
    pub fn absorb(&mut self, later: Snapshot) {
        for (path, previous) in later.entries {
            if !self.entries.iter().any(|(p, _)| *p == path) {
                self.entries.push((path, previous));
            }
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(p, _)| p.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Puts every recorded file back. Restores in reverse order and keeps
    /// going past individual failures; the first one is returned.
    pub fn restore(&self) -> Result<()> {
        let mut first_error = None;
        for (path, previous) in self.entries.iter().rev() {
            let outcome = match previous {
                Some(bytes) => fs::write(path, bytes),
                None => match fs::remove_file(path) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(source) = outcome {
                warn!("Failed to restore {}: {source}", path.display());
                first_error.get_or_insert(PlanError::FileSystem {
                    path: path.clone(),
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Resolves a plan path against `root`, rejecting anything that could
/// escape it.
pub fn resolve_path(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    if path.trim().is_empty() {
        return Err(PlanError::invalid_input("path").with_reason("Path cannot be empty"));
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(PlanError::invalid_input("path")
                    .with_reason(format!("'{path}' points outside the project")))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PlanError::invalid_input("path")
                    .with_reason(format!("'{path}' must be relative to the project")))
            }
        }
    }
    Ok(root.join(relative))
}

/// Writes `paths` from `current` under `root`.
///
/// # Errors
///
/// Returns an invalid-input error for unsafe paths or paths with no
/// current content, and file-system errors from writing. On any error the
/// files written so far are restored.
pub fn write_files(root: &Path, current: &CurrentPlanFiles, paths: &[String]) -> Result<ApplyReport> {
    let mut targets = Vec::with_capacity(paths.len());
    for path in paths {
        let content = current.files.get(path).ok_or_else(|| {
            PlanError::invalid_input("path").with_reason(format!("No current content for '{path}'"))
        })?;
        targets.push((resolve_path(root, path)?, content));
    }

    let mut report = ApplyReport::default();
    for (target, content) in targets {
        if let Err(e) = write_one(&mut report, &target, content) {
            warn!("Apply failed at {}, restoring {} files", target.display(), report.snapshot.len());
            if let Err(restore) = report.snapshot.restore() {
                warn!("Restore incomplete: {restore}");
            }
            return Err(e);
        }
    }
    Ok(report)
}

fn write_one(report: &mut ApplyReport, target: &Path, content: &str) -> Result<()> {
    let existed = target.exists();
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| PlanError::FileSystem {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    report.snapshot.capture(target)?;
    fs::write(target, content).map_err(|source| PlanError::FileSystem {
        path: target.to_path_buf(),
        source,
    })?;
    debug!("Wrote {}", target.display());

    report.written.push(target.to_path_buf());
    if !existed {
        report.created.push(target.to_path_buf());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files(pairs: &[(&str, &str)]) -> CurrentPlanFiles {
        let mut current = CurrentPlanFiles::default();
        for (path, content) in pairs {
            current.files.insert((*path).to_string(), (*content).to_string());
        }
        current
    }

    #[test]
    fn test_write_files_creates_nested_dirs() {
        let dir = TempDir::new().unwrap();
        let current = files(&[("src/deep/lib.rs", "pub mod a;\n")]);

        let report = write_files(dir.path(), &current, &["src/deep/lib.rs".to_string()]).unwrap();

        assert_eq!(report.written.len(), 1);
        assert_eq!(report.created.len(), 1);
        let written = fs::read_to_string(dir.path().join("src/deep/lib.rs")).unwrap();
        assert_eq!(written, "pub mod a;\n");
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_path(dir.path(), "../outside.txt").is_err());
        assert!(resolve_path(dir.path(), "/etc/passwd").is_err());
        assert!(resolve_path(dir.path(), "").is_err());
        assert!(resolve_path(dir.path(), "./ok/fine.txt").is_ok());
    }

    #[test]
    fn test_unsafe_path_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let current = files(&[("a.txt", "a"), ("../b.txt", "b")]);

        let result = write_files(dir.path(), &current, &["a.txt".to_string(), "../b.txt".to_string()]);

        assert!(matches!(result, Err(PlanError::InvalidInput { .. })));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_failed_write_restores_earlier_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "original").unwrap();
        // A directory where a file should go makes the second write fail.
        fs::create_dir(dir.path().join("b.txt")).unwrap();
        let current = files(&[("a.txt", "changed"), ("b.txt", "b"), ("new.txt", "n")]);

        let result = write_files(
            dir.path(),
            &current,
            &["a.txt".to_string(), "new.txt".to_string(), "b.txt".to_string()],
        );

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "original");
        assert!(!dir.path().join("new.txt").exists());
    }

    #[test]
    fn test_snapshot_restore_after_success() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "before").unwrap();
        let current = files(&[("a.txt", "after"), ("fresh.txt", "x")]);

        let report = write_files(dir.path(), &current, &["a.txt".to_string(), "fresh.txt".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "after");

        report.snapshot().restore().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "before");
        assert!(!dir.path().join("fresh.txt").exists());
    }

    #[test]
    fn test_absorb_keeps_earliest_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "v1").unwrap();

        let mut first = Snapshot::default();
        first.capture(&path).unwrap();
        fs::write(&path, "v2").unwrap();
        let mut second = Snapshot::default();
        second.capture(&path).unwrap();
        second.capture(&dir.path().join("b.txt")).unwrap();

        first.absorb(second);
        assert_eq!(first.len(), 2);
        first.restore().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "v1");
    }
}
