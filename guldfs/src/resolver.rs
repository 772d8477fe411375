//! Mapping of virtual paths into a user's subtree of the blocktree

use crate::error::{Error, Result};

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A path as seen through the mount, always rooted at `/`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// The mount root
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Wraps a path without checking it. The resolver rejects unsafe components.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Appends one entry name sent by the kernel
    pub fn join(&self, name: &[u8]) -> Result<Self> {
        let name = std::str::from_utf8(name)
            .map_err(|_| Error::InvalidName(String::from_utf8_lossy(name).into_owned()))?;
        if name.is_empty() || name == "." || name == ".." || name.contains(&['/', '\0'][..]) {
            return Err(Error::InvalidName(name.to_owned()));
        }
        let mut path = self.0.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(name);
        Ok(Self(path))
    }

    /// Returns true if `self` is `ancestor` or lies below it
    #[must_use]
    pub fn starts_with(&self, ancestor: &Self) -> bool {
        if ancestor.is_root() || self == ancestor {
            return true;
        }
        self.0
            .strip_prefix(&ancestor.0)
            .map_or(false, |rest| rest.starts_with('/'))
    }

    /// Moves `self` from below `from` to below `to`
    #[must_use]
    pub fn rebase(&self, from: &Self, to: &Self) -> Option<Self> {
        if self == from {
            return Some(to.clone());
        }
        if !self.starts_with(from) {
            return None;
        }
        let rest = self.0.get(from.0.len()..)?.trim_start_matches('/');
        let mut path = to.0.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(rest);
        Some(Self(path))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VirtualPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// A path inside the blocktree, always below the user's subtree root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalPath(PathBuf);

impl PhysicalPath {
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for PhysicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("path {0:?} climbs out of the user's subtree")]
    ParentComponent(String),

    #[error("path {0:?} contains a nul byte")]
    NulByte(String),
}

/// Maps virtual paths of one user onto the blocktree
#[derive(Debug, Clone)]
pub struct PathResolver {
    /// `blocktree/<user>`
    user_root: PathBuf,
}

impl PathResolver {
    /// `user` must be a single path component
    #[must_use]
    pub fn new(blocktree: &Path, user: &str) -> Self {
        Self {
            user_root: blocktree.join(user),
        }
    }

    #[must_use]
    pub fn user_root(&self) -> &Path {
        &self.user_root
    }

    /// Maps a virtual path to `blocktree/<user>/<components...>`.
    ///
    /// Components are appended one at a time, so absolute segments never
    /// reparent. Empty and `.` components are dropped, `..` is rejected.
    pub fn resolve(&self, path: &VirtualPath) -> Result<PhysicalPath, ResolveError> {
        if path.as_str().contains('\0') {
            return Err(ResolveError::NulByte(path.as_str().to_owned()));
        }
        let mut physical = self.user_root.clone();
        for component in path.as_str().split('/') {
            match component {
                "" | "." => {}
                ".." => return Err(ResolveError::ParentComponent(path.as_str().to_owned())),
                name => physical.push(name),
            }
        }
        Ok(PhysicalPath(physical))
    }
}

/// Lexically normalizes an absolute path, dropping `.` and folding `..`
fn normalize(path: &Path) -> Vec<Component<'_>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(_) => parts.push(component),
            Component::ParentDir => {
                let _ = parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    parts
}

/// Rewrites an absolute symlink target as a path relative to the mount root.
/// Relative targets are returned unchanged.
#[must_use]
pub fn sanitize_link_target(mount_root: &Path, target: &Path) -> PathBuf {
    if !target.is_absolute() {
        return target.to_path_buf();
    }

    let base = normalize(mount_root);
    let dest = normalize(target);
    let common = base
        .iter()
        .zip(dest.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in dest.iter().skip(common) {
        relative.push(component);
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}
