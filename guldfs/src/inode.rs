//! Node ids handed to the kernel and the virtual paths they stand for

use crate::error::{Error, Result};
use crate::resolver::VirtualPath;

use std::collections::HashMap;

use async_fuse::kernel::FUSE_ROOT_ID;
use tracing::debug;

/// A node the kernel holds a reference to
#[derive(Debug)]
struct Node {
    path: VirtualPath,
    /// lookups not yet forgotten
    nlookup: u64,
}

/// Maps node ids to virtual paths.
///
/// A node lives from its first lookup until the kernel forgets every lookup
/// of it. The root is never forgotten.
#[derive(Debug)]
pub struct InodeTable {
    nodes: HashMap<u64, Node>,
    by_path: HashMap<VirtualPath, u64>,
    next_ino: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            nodes: HashMap::new(),
            by_path: HashMap::new(),
            next_ino: FUSE_ROOT_ID.wrapping_add(1),
        };
        let root = VirtualPath::root();
        let _ = table.by_path.insert(root.clone(), FUSE_ROOT_ID);
        let _ = table.nodes.insert(
            FUSE_ROOT_ID,
            Node {
                path: root,
                nlookup: 1,
            },
        );
        table
    }

    pub fn path(&self, ino: u64) -> Result<VirtualPath> {
        self.nodes
            .get(&ino)
            .map(|node| node.path.clone())
            .ok_or(Error::StaleNode(ino))
    }

    /// Records one lookup of `path` and returns its node id
    pub fn lookup(&mut self, path: &VirtualPath) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.nlookup = node.nlookup.wrapping_add(1);
            }
            return ino;
        }

        let ino = self.next_ino;
        self.next_ino = self.next_ino.wrapping_add(1);
        let _ = self.by_path.insert(path.clone(), ino);
        let _ = self.nodes.insert(
            ino,
            Node {
                path: path.clone(),
                nlookup: 1,
            },
        );
        ino
    }

    pub fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == FUSE_ROOT_ID {
            return;
        }
        let remove = match self.nodes.get_mut(&ino) {
            Some(node) => {
                node.nlookup = node.nlookup.saturating_sub(nlookup);
                node.nlookup == 0
            }
            None => false,
        };
        if remove {
            if let Some(node) = self.nodes.remove(&ino) {
                if self.by_path.get(&node.path) == Some(&ino) {
                    let _ = self.by_path.remove(&node.path);
                }
                debug!(ino, path = %node.path, "forgot node");
            }
        }
    }

    /// Moves `old` and everything below it to `new`.
    /// A node already at `new` loses its name.
    pub fn rename(&mut self, old: &VirtualPath, new: &VirtualPath) {
        self.unlink(new);

        let moved: Vec<(VirtualPath, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(old) && !path.is_root())
            .map(|(path, &ino)| (path.clone(), ino))
            .collect();

        for (path, ino) in moved {
            let _ = self.by_path.remove(&path);
            if let Some(target) = path.rebase(old, new) {
                if let Some(node) = self.nodes.get_mut(&ino) {
                    node.path = target.clone();
                }
                let _ = self.by_path.insert(target, ino);
            }
        }
    }

    /// Detaches the name `path`. The node stays valid until forgotten.
    pub fn unlink(&mut self, path: &VirtualPath) {
        let _ = self.by_path.remove(path);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> VirtualPath {
        VirtualPath::from(s)
    }

    #[test]
    fn root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.path(FUSE_ROOT_ID).unwrap(), VirtualPath::root());
        assert!(matches!(table.path(2), Err(Error::StaleNode(2))));
    }

    #[test]
    fn lookup_reuses_ids_until_forgotten() {
        let mut table = InodeTable::new();
        let a = table.lookup(&p("/a"));
        assert_eq!(table.lookup(&p("/a")), a);
        let b = table.lookup(&p("/b"));
        assert_ne!(a, b);

        table.forget(a, 1);
        assert_eq!(table.path(a).unwrap(), p("/a"));
        table.forget(a, 1);
        assert!(table.path(a).is_err());

        let again = table.lookup(&p("/a"));
        assert_ne!(again, a);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn root_survives_forget() {
        let mut table = InodeTable::new();
        table.forget(FUSE_ROOT_ID, 100);
        assert_eq!(table.path(FUSE_ROOT_ID).unwrap(), VirtualPath::root());
    }

    #[test]
    fn rename_moves_descendants() {
        let mut table = InodeTable::new();
        let dir = table.lookup(&p("/docs"));
        let file = table.lookup(&p("/docs/a.txt"));
        let sibling = table.lookup(&p("/docsx"));

        table.rename(&p("/docs"), &p("/archive/docs"));

        assert_eq!(table.path(dir).unwrap(), p("/archive/docs"));
        assert_eq!(table.path(file).unwrap(), p("/archive/docs/a.txt"));
        assert_eq!(table.path(sibling).unwrap(), p("/docsx"));
        assert_eq!(table.lookup(&p("/archive/docs/a.txt")), file);
    }

    #[test]
    fn rename_over_existing_detaches_target() {
        let mut table = InodeTable::new();
        let a = table.lookup(&p("/a"));
        let b = table.lookup(&p("/b"));
        table.rename(&p("/a"), &p("/b"));

        assert_eq!(table.lookup(&p("/b")), a);
        // the replaced node keeps its stale path until the kernel forgets it
        assert_eq!(table.path(b).unwrap(), p("/b"));
        table.forget(b, 1);
        assert!(table.path(b).is_err());
        assert_eq!(table.path(a).unwrap(), p("/b"));
    }

    #[test]
    fn unlink_then_lookup_allocates_new_id() {
        let mut table = InodeTable::new();
        let a = table.lookup(&p("/a"));
        table.unlink(&p("/a"));
        let fresh = table.lookup(&p("/a"));
        assert_ne!(a, fresh);
        table.forget(a, 1);
        assert_eq!(table.path(fresh).unwrap(), p("/a"));
    }
}
