//! The mount context and its state machine

use crate::bus::NotificationBus;
use crate::config::MountConfig;
use crate::error::{Error, Result};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

/// `Unmounted → Mounting → Mounted → Unmounting → Unmounted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

/// One mount of one user's subtree
#[derive(Debug)]
pub struct Mount {
    config: MountConfig,
    bus: Arc<NotificationBus>,
    state: Mutex<MountState>,
}

impl Mount {
    /// A mount publishing on a ZeroMQ endpoint
    #[must_use]
    pub fn new(config: MountConfig) -> Self {
        let bus = NotificationBus::new(config.endpoint.clone(), config.settle_delay);
        Self::with_bus(config, Arc::new(bus))
    }

    #[must_use]
    pub fn with_bus(config: MountConfig, bus: Arc<NotificationBus>) -> Self {
        Self {
            config,
            bus,
            state: Mutex::new(MountState::Unmounted),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    #[must_use]
    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    /// Checks the mount root, then binds the bus and waits out the settle delay
    #[tracing::instrument(skip(self), fields(root = %self.config.root.display()))]
    pub async fn start(&self) -> Result<()> {
        if !self.config.root.is_dir() {
            error!("mount root does not exist");
            return Err(Error::RootMissing(self.config.root.clone()));
        }
        *self.state.lock() = MountState::Mounting;
        debug!(endpoint = %self.bus.endpoint(), "binding notification bus");
        self.bus.bind().await?;
        Ok(())
    }

    /// Announces the mount. Called when the kernel initializes the session.
    pub async fn init(&self) -> Result<()> {
        self.bus
            .announce_mount(&self.config.root, &self.config.user)
            .await?;
        *self.state.lock() = MountState::Mounted;
        info!(root = %self.config.root.display(), user = %self.config.user, "mounted");
        Ok(())
    }

    /// Announces the unmount and closes the bus. Only the first call after
    /// a successful `init` publishes anything.
    pub async fn destroy(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            match previous {
                MountState::Mounted | MountState::Mounting => *state = MountState::Unmounting,
                MountState::Unmounting | MountState::Unmounted => return Ok(()),
            }
            previous
        };

        let announced = if previous == MountState::Mounted {
            self.bus.announce_unmount().await
        } else {
            Ok(())
        };
        let closed = self.bus.shutdown().await;

        *self.state.lock() = MountState::Unmounted;
        info!("unmounted");
        announced?;
        closed?;
        Ok(())
    }

    /// Fails with [`Error::NotMounted`] unless the mount is serving
    pub fn ensure_mounted(&self) -> Result<()> {
        match self.state() {
            MountState::Mounted => Ok(()),
            _ => Err(Error::NotMounted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::Recorder;
    use crate::config::Identity;

    use std::path::PathBuf;
    use std::time::Duration;

    use async_std::task::block_on;

    fn mount_at(root: PathBuf) -> (Mount, Recorder) {
        let admin = Identity {
            name: "root".into(),
            uid: 0,
            gid: 0,
        };
        let config = MountConfig::new(root, "/tmp/blocktree".into(), "isysd".into(), admin)
            .unwrap()
            .settle_delay(Duration::ZERO);
        let recorder = Recorder::default();
        let bus = NotificationBus::with_transport(recorder.transport(), "inproc", Duration::ZERO);
        (Mount::with_bus(config, Arc::new(bus)), recorder)
    }

    #[test]
    fn full_cycle_publishes_exactly_one_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let (mount, recorder) = mount_at(root.clone());

        block_on(async {
            assert!(mount.ensure_mounted().is_err());
            mount.start().await.unwrap();
            assert_eq!(mount.state(), MountState::Mounting);
            assert!(matches!(mount.ensure_mounted(), Err(Error::NotMounted)));

            mount.init().await.unwrap();
            assert_eq!(mount.state(), MountState::Mounted);
            mount.ensure_mounted().unwrap();

            mount.destroy().await.unwrap();
            mount.destroy().await.unwrap();
            assert_eq!(mount.state(), MountState::Unmounted);
        });

        assert_eq!(
            recorder.bodies(),
            vec![format!("mount:{}:isysd", root.display()), "destroy".to_owned()]
        );
    }

    #[test]
    fn missing_root_leaves_state_unmounted() {
        let dir = tempfile::tempdir().unwrap();
        let (mount, recorder) = mount_at(dir.path().join("absent"));
        let err = block_on(mount.start()).unwrap_err();
        assert!(matches!(err, Error::RootMissing(_)));
        assert_eq!(mount.state(), MountState::Unmounted);
        assert!(recorder.bodies().is_empty());
    }

    #[test]
    fn destroy_before_init_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mount, recorder) = mount_at(dir.path().to_path_buf());
        block_on(async {
            mount.destroy().await.unwrap();
            mount.start().await.unwrap();
            mount.destroy().await.unwrap();
        });
        assert_eq!(mount.state(), MountState::Unmounted);
        assert!(recorder.bodies().is_empty());
    }
}
