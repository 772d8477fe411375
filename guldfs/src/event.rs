//! Notifications published for every file system operation.
//!
//! Each event travels as two frames: the [`TOPIC`], then a colon-delimited
//! body whose first field names the operation. Numbers are decimal.

use crate::resolver::VirtualPath;

use std::fmt;
use std::path::PathBuf;

/// The topic frame of every notification
pub const TOPIC: &str = "guldfs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Mount { root: PathBuf, user: String },
    Unmount,
    Chmod { path: VirtualPath, mode: u32 },
    /// An id of `None` is left unchanged and rendered as `-1`
    Chown {
        path: VirtualPath,
        uid: Option<u32>,
        gid: Option<u32>,
    },
    /// The last field is always `None`: no file info travels with a create
    Create { path: VirtualPath, mode: u32 },
    /// Sent for both flush and fsync
    Fsync { path: VirtualPath },
    FsyncDir { path: VirtualPath },
    Link {
        new_path: VirtualPath,
        existing_path: VirtualPath,
    },
    MkDir { path: VirtualPath, mode: u32 },
    Open { path: VirtualPath, flags: u32 },
    OpenDir { path: VirtualPath },
    ReadDir { path: VirtualPath },
    ReadLink { path: VirtualPath },
    Release { path: VirtualPath, fh: u64 },
    ReleaseDir { path: VirtualPath, fh: u64 },
    Rename {
        old_path: VirtualPath,
        new_path: VirtualPath,
    },
    RmDir { path: VirtualPath },
    SymLink {
        link_path: VirtualPath,
        link_target: String,
    },
    /// A missing handle is rendered as `None`
    Truncate {
        path: VirtualPath,
        length: u64,
        fh: Option<u64>,
    },
    Unlink { path: VirtualPath },
    Write { path: VirtualPath },
}

/// Renders an optional id the way subscribers expect an unset one
struct Id(Option<u32>);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => f.write_str("-1"),
        }
    }
}

impl Event {
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        TOPIC
    }

    /// The body frame
    #[must_use]
    pub fn body(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Mount { ref root, ref user } => write!(f, "mount:{}:{}", root.display(), user),
            Self::Unmount => f.write_str("destroy"),
            Self::Chmod { ref path, mode } => write!(f, "chmod:{}:{}", path, mode),
            // subscribers know chown under the chmod tag
            Self::Chown { ref path, uid, gid } => {
                write!(f, "chmod:{}:{}:{}", path, Id(uid), Id(gid))
            }
            Self::Create { ref path, mode } => write!(f, "create:{}:{}:None", path, mode),
            Self::Fsync { ref path } => write!(f, "fsync:{}", path),
            Self::FsyncDir { ref path } => write!(f, "fsyncdir:{}", path),
            Self::Link {
                ref new_path,
                ref existing_path,
            } => write!(f, "link:{}:{}", new_path, existing_path),
            Self::MkDir { ref path, mode } => write!(f, "mkdir:{}:{}", path, mode),
            Self::Open { ref path, flags } => write!(f, "open:{}:{}", path, flags),
            Self::OpenDir { ref path } => write!(f, "opendir:{}", path),
            Self::ReadDir { ref path } => write!(f, "readdir:{}", path),
            Self::ReadLink { ref path } => write!(f, "readlink:{}", path),
            Self::Release { ref path, fh } => write!(f, "release:{}:{}", path, fh),
            Self::ReleaseDir { ref path, fh } => write!(f, "releasedir:{}:{}", path, fh),
            Self::Rename {
                ref old_path,
                ref new_path,
            } => write!(f, "rename:{}:{}", old_path, new_path),
            Self::RmDir { ref path } => write!(f, "rmdir:{}", path),
            Self::SymLink {
                ref link_path,
                ref link_target,
            } => write!(f, "symlink:{}:{}", link_path, link_target),
            Self::Truncate {
                ref path,
                length,
                fh,
            } => {
                write!(f, "truncate:{}:{}:", path, length)?;
                match fh {
                    Some(fh) => write!(f, "{}", fh),
                    None => f.write_str("None"),
                }
            }
            Self::Unlink { ref path } => write!(f, "unlink:{}", path),
            Self::Write { ref path } => write!(f, "write:{}", path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> VirtualPath {
        VirtualPath::from(s)
    }

    #[test]
    fn lifecycle_bodies() {
        let mount = Event::Mount {
            root: "/home".into(),
            user: "isysd".into(),
        };
        assert_eq!(mount.body(), "mount:/home:isysd");
        assert_eq!(mount.topic(), "guldfs");
        assert_eq!(Event::Unmount.body(), "destroy");
    }

    #[test]
    fn single_path_bodies() {
        let cases = vec![
            (Event::Chmod { path: p("/a"), mode: 33188 }, "chmod:/a:33188"),
            (Event::Fsync { path: p("/a") }, "fsync:/a"),
            (Event::FsyncDir { path: p("/d") }, "fsyncdir:/d"),
            (Event::MkDir { path: p("/d"), mode: 493 }, "mkdir:/d:493"),
            (Event::Open { path: p("/a"), flags: 32768 }, "open:/a:32768"),
            (Event::OpenDir { path: p("/") }, "opendir:/"),
            (Event::ReadDir { path: p("/") }, "readdir:/"),
            (Event::ReadLink { path: p("/l") }, "readlink:/l"),
            (Event::Release { path: p("/a"), fh: 7 }, "release:/a:7"),
            (Event::ReleaseDir { path: p("/d"), fh: 3 }, "releasedir:/d:3"),
            (Event::RmDir { path: p("/d") }, "rmdir:/d"),
            (Event::Unlink { path: p("/a") }, "unlink:/a"),
            (Event::Write { path: p("/a") }, "write:/a"),
        ];
        for (event, body) in cases {
            assert_eq!(event.body(), body);
        }
    }

    #[test]
    fn multi_field_bodies() {
        let create = Event::Create {
            path: p("/new"),
            mode: 33188,
        };
        assert_eq!(create.body(), "create:/new:33188:None");

        let chown = Event::Chown {
            path: p("/a"),
            uid: Some(1000),
            gid: None,
        };
        assert_eq!(chown.body(), "chmod:/a:1000:-1");

        let link = Event::Link {
            new_path: p("/b"),
            existing_path: p("/a"),
        };
        assert_eq!(link.body(), "link:/b:/a");

        let rename = Event::Rename {
            old_path: p("/a"),
            new_path: p("/b"),
        };
        assert_eq!(rename.body(), "rename:/a:/b");

        let symlink = Event::SymLink {
            link_path: p("/l"),
            link_target: "../x".into(),
        };
        assert_eq!(symlink.body(), "symlink:/l:../x");
    }

    #[test]
    fn truncate_without_handle() {
        let with_fh = Event::Truncate {
            path: p("/a"),
            length: 10,
            fh: Some(4),
        };
        assert_eq!(with_fh.body(), "truncate:/a:10:4");

        let without_fh = Event::Truncate {
            path: p("/a"),
            length: 0,
            fh: None,
        };
        assert_eq!(without_fh.body(), "truncate:/a:0:None");
    }
}
