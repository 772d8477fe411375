//! A FUSE file system exposing one user's subtree of the blocktree, which
//! publishes every operation on a ZeroMQ channel before performing it.

#![deny(clippy::all)]
#![allow(clippy::missing_errors_doc)]

mod bus;
mod config;
mod dispatcher;
mod error;
mod event;
mod fuse;
mod inode;
mod lifecycle;
mod resolver;
mod store;

pub use self::bus::{BusError, NotificationBus, Transport, ZmqTransport};
pub use self::config::{
    select_user, ConfigError, Identity, MountConfig, DEFAULT_ENDPOINT, DEFAULT_SETTLE_DELAY,
};
pub use self::dispatcher::Dispatcher;
pub use self::error::{Error, Result};
pub use self::event::{Event, TOPIC};
pub use self::fuse::GuldFs;
pub use self::inode::InodeTable;
pub use self::lifecycle::{Mount, MountState};
pub use self::resolver::{sanitize_link_target, PathResolver, PhysicalPath, ResolveError, VirtualPath};
pub use self::store::{DirEntry, StatVfs, TimeSpec};
