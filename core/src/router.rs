//! Repository router: picks the working directory for an assistant run from free-text command input.
//! Aliases are scanned in configuration order; the first alias contained in the text (case-insensitive) wins.
//! No match is not an error, it selects the default repository.

use std::path::{Path, PathBuf};

use crate::config::{Config, RepositoryConfig};

/// Outcome of routing one command. `repo` is None when the default path was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub repo: Option<&'a RepositoryConfig>,
    pub path: &'a Path,
}

impl Route<'_> {
    /// Short project name for status lines: the last path component (e.g. `/home/me/tourii` -> `tourii`).
    pub fn project_name(&self) -> String {
        project_name(self.path)
    }

    pub fn is_default(&self) -> bool {
        self.repo.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct RepoRouter {
    repos: Vec<RepositoryConfig>,
    default_path: PathBuf,
}

impl RepoRouter {
    pub fn new(repos: Vec<RepositoryConfig>, default_path: impl Into<PathBuf>) -> Self {
        let repos = repos.into_iter().filter(|r| !r.alias.is_empty()).collect();
        Self {
            repos,
            default_path: default_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.repositories.clone(), config.default_repo_path.clone())
    }

    /// Select exactly one repository path for `text`.
    pub fn route(&self, text: &str) -> Route<'_> {
        let lowered = text.to_lowercase();
        self.repos
            .iter()
            .find(|r| lowered.contains(&r.alias))
            .map(|r| Route {
                repo: Some(r),
                path: r.path.as_path(),
            })
            .unwrap_or(Route {
                repo: None,
                path: self.default_path.as_path(),
            })
    }

    pub fn route_path(&self, text: &str) -> &Path {
        self.route(text).path
    }

    pub fn default_path(&self) -> &Path {
        &self.default_path
    }

    pub fn repositories(&self) -> &[RepositoryConfig] {
        &self.repos
    }
}

pub fn project_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
