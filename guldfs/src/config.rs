//! Mount configuration

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::raw::c_char;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use std::{io, ptr};

/// Default notification endpoint
pub const DEFAULT_ENDPOINT: &str = "ipc:///tmp/guldfs0.ipc";

/// Default delay between binding the endpoint and serving the first request
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no user given and $USER is not set")]
    MissingUser,

    #[error("invalid user name {0:?}: must be a single path component")]
    InvalidUser(String),

    #[error("unknown user {0:?}")]
    UnknownIdentity(String),

    #[error("failed to look up user {name:?}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("mount root {} must be an absolute path", .0.display())]
    RelativeRoot(PathBuf),
}

/// A named system account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Looks up an account in the password database
    pub fn lookup(name: &str) -> Result<Self, ConfigError> {
        let c_name = CString::new(name).map_err(|_| ConfigError::InvalidUser(name.to_owned()))?;

        let mut buf: Vec<c_char> = vec![0; 1024];
        loop {
            let mut pwd: MaybeUninit<libc::passwd> = MaybeUninit::zeroed();
            let mut result: *mut libc::passwd = ptr::null_mut();
            let ret = unsafe {
                libc::getpwnam_r(
                    c_name.as_ptr(),
                    pwd.as_mut_ptr(),
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };
            if ret == libc::ERANGE && buf.len() < 1024 * 1024 {
                buf.resize(buf.len().wrapping_mul(2), 0);
                continue;
            }
            if ret != 0 {
                return Err(ConfigError::Lookup {
                    name: name.to_owned(),
                    source: io::Error::from_raw_os_error(ret),
                });
            }
            if result.is_null() {
                return Err(ConfigError::UnknownIdentity(name.to_owned()));
            }
            let pwd = unsafe { pwd.assume_init() };
            return Ok(Self {
                name: name.to_owned(),
                uid: pwd.pw_uid,
                gid: pwd.pw_gid,
            });
        }
    }
}

/// Picks the user to mount: the explicit one, else the login name from `$USER`
pub fn select_user(explicit: Option<String>, login: Option<String>) -> Result<String, ConfigError> {
    explicit
        .or(login)
        .filter(|user| !user.is_empty())
        .ok_or(ConfigError::MissingUser)
}

/// Everything a mount needs to know, fixed for its lifetime
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// the mount point
    pub root: PathBuf,
    /// the root of the backing store
    pub blocktree: PathBuf,
    /// the user whose subtree is exposed
    pub user: String,
    /// the owner of created files
    pub admin: Identity,
    /// the notification endpoint
    pub endpoint: String,
    /// the wait after binding the endpoint
    pub settle_delay: Duration,
}

/// Checks that `user` names exactly one normal path component
fn validate_user(user: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUser(user.to_owned());
    if user.contains('\0') {
        return Err(invalid());
    }
    let mut components = Path::new(user).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == user => Ok(()),
        _ => Err(invalid()),
    }
}

impl MountConfig {
    /// Creates a config with the default endpoint and settle delay
    pub fn new(
        root: PathBuf,
        blocktree: PathBuf,
        user: String,
        admin: Identity,
    ) -> Result<Self, ConfigError> {
        validate_user(&user)?;
        if !root.is_absolute() {
            return Err(ConfigError::RelativeRoot(root));
        }
        Ok(Self {
            root,
            blocktree,
            user,
            admin,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}
