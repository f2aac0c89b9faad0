//! Commit history access
//!
//! [`History`] is everything resolution needs to know about the repository.
//! [`GitHistory`] answers it from a git2 repository.

use anyhow::{Context, Result};
use git2::{ObjectType, Oid, Repository};
use std::path::{Path, PathBuf};

use crate::delta::{delta_between, Delta};

pub trait History {
    /// Hash of the commit currently checked out
    fn current_commit(&self) -> Result<String>;

    /// False when the commit is unknown or no longer reachable
    fn ensure_commit_exists(&self, commit: &str) -> Result<bool>;

    fn delta_between_commits(&self, from: &str, to: &str, file_path: &Path) -> Result<Delta>;

    /// Delta from the file at the current commit to an unsaved buffer
    fn delta_for_uncommitted_changes(&self, file_path: &Path, buffer_text: &str) -> Result<Delta>;
}

impl<T: History + ?Sized> History for &T {
    fn current_commit(&self) -> Result<String> {
        (**self).current_commit()
    }

    fn ensure_commit_exists(&self, commit: &str) -> Result<bool> {
        (**self).ensure_commit_exists(commit)
    }

    fn delta_between_commits(&self, from: &str, to: &str, file_path: &Path) -> Result<Delta> {
        (**self).delta_between_commits(from, to, file_path)
    }

    fn delta_for_uncommitted_changes(&self, file_path: &Path, buffer_text: &str) -> Result<Delta> {
        (**self).delta_for_uncommitted_changes(file_path, buffer_text)
    }
}

pub struct GitHistory {
    repo: Repository,
}

impl GitHistory {
    /// Opens the repository containing `start`
    pub fn discover(start: &Path) -> Result<Self> {
        let repo = Repository::discover(start).context("Not in a git repository")?;
        Ok(Self { repo })
    }

    pub fn workdir(&self) -> Result<PathBuf> {
        self.repo
            .workdir()
            .map(PathBuf::from)
            .context("Repository has no working directory")
    }

    /// Path of a file relative to the work directory, as stored in trees
    pub fn relative_path(&self, file_path: &Path) -> Result<PathBuf> {
        if file_path.is_relative() {
            return Ok(file_path.to_path_buf());
        }

        let workdir = self.workdir()?;
        let workdir = workdir.canonicalize().unwrap_or(workdir);
        let absolute = file_path
            .canonicalize()
            .unwrap_or_else(|_| file_path.to_path_buf());

        absolute
            .strip_prefix(&workdir)
            .map(Path::to_path_buf)
            .with_context(|| format!("{} is outside the repository", file_path.display()))
    }

    /// File contents at a commit; a path missing from the tree reads as empty
    fn file_at_commit(&self, commit: &str, file_path: &Path) -> Result<String> {
        let oid = Oid::from_str(commit).with_context(|| format!("Invalid commit id {commit}"))?;
        let tree = self
            .repo
            .find_commit(oid)
            .with_context(|| format!("Commit {commit} not found"))?
            .tree()?;

        let relative = self.relative_path(file_path)?;
        let entry = match tree.get_path(&relative) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(String::new()),
            Err(e) => return Err(e.into()),
        };

        let object = entry.to_object(&self.repo)?;
        let blob = object
            .peel(ObjectType::Blob)?
            .into_blob()
            .map_err(|_| anyhow::anyhow!("{} is not a file", relative.display()))?;

        Ok(String::from_utf8_lossy(blob.content()).into_owned())
    }
}

impl History for GitHistory {
    fn current_commit(&self) -> Result<String> {
        let head = self
            .repo
            .head()
            .context("Failed to resolve HEAD")?
            .peel_to_commit()
            .context("HEAD does not point at a commit")?;
        Ok(head.id().to_string())
    }

    fn ensure_commit_exists(&self, commit: &str) -> Result<bool> {
        let Ok(oid) = Oid::from_str(commit) else {
            return Ok(false);
        };
        Ok(self.repo.find_commit(oid).is_ok())
    }

    fn delta_between_commits(&self, from: &str, to: &str, file_path: &Path) -> Result<Delta> {
        if from == to {
            return Ok(Delta::default());
        }
        let old_text = self.file_at_commit(from, file_path)?;
        let new_text = self.file_at_commit(to, file_path)?;
        Ok(delta_between(&old_text, &new_text)?)
    }

    fn delta_for_uncommitted_changes(&self, file_path: &Path, buffer_text: &str) -> Result<Delta> {
        let head = self.current_commit()?;
        let committed = self.file_at_commit(&head, file_path)?;
        Ok(delta_between(&committed, buffer_text)?)
    }
}
