//! The notification bus: one publish endpoint per mount

use crate::event::{Event, TOPIC};

use std::path::Path;
use std::time::Duration;

use async_std::sync::Mutex;
use async_std::task;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("notification bus is not bound")]
    NotBound,

    #[error("notification bus is shut down")]
    Closed,

    #[error("failed to bind {endpoint}: {reason}")]
    Bind { endpoint: String, reason: String },

    #[error("failed to send notification: {reason}")]
    Send { reason: String },
}

/// A publish socket
#[async_trait]
pub trait Transport: Send {
    async fn bind(&mut self, endpoint: &str) -> Result<(), BusError>;

    /// Sends one message of two frames
    async fn send(&mut self, topic: &str, body: &str) -> Result<(), BusError>;

    async fn close(&mut self) -> Result<(), BusError>;
}

/// A ZeroMQ PUB socket
#[derive(Default)]
pub struct ZmqTransport {
    socket: Option<PubSocket>,
}

impl ZmqTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ZmqTransport {
    async fn bind(&mut self, endpoint: &str) -> Result<(), BusError> {
        let mut socket = PubSocket::new();
        let bound = socket.bind(endpoint).await.map_err(|err| BusError::Bind {
            endpoint: endpoint.to_owned(),
            reason: err.to_string(),
        })?;
        debug!(?bound, "bound notification endpoint");
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, topic: &str, body: &str) -> Result<(), BusError> {
        let socket = self.socket.as_mut().ok_or(BusError::NotBound)?;
        let mut message = ZmqMessage::from(topic.to_owned());
        message.push_back(Bytes::from(body.to_owned()));
        socket.send(message).await.map_err(|err| BusError::Send {
            reason: err.to_string(),
        })
    }

    async fn close(&mut self) -> Result<(), BusError> {
        // dropping the socket unbinds it
        if self.socket.take().is_some() {
            debug!("closed notification endpoint");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Unbound,
    Bound,
    Closed,
}

struct BusInner {
    transport: Box<dyn Transport>,
    state: BusState,
}

/// Publishes events in the order they are handed in.
///
/// Publishing is awaited by the caller, so an event is out before the
/// operation it describes takes effect. Nothing is batched or dropped: a
/// failure is returned to the caller.
pub struct NotificationBus {
    endpoint: String,
    settle_delay: Duration,
    inner: Mutex<BusInner>,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("endpoint", &self.endpoint)
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

impl NotificationBus {
    /// A bus over a ZeroMQ PUB socket
    #[must_use]
    pub fn new(endpoint: impl Into<String>, settle_delay: Duration) -> Self {
        Self::with_transport(Box::new(ZmqTransport::new()), endpoint, settle_delay)
    }

    #[must_use]
    pub fn with_transport(
        transport: Box<dyn Transport>,
        endpoint: impl Into<String>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            settle_delay,
            inner: Mutex::new(BusInner {
                transport,
                state: BusState::Unbound,
            }),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Binds the endpoint, then waits out the settle delay so that
    /// subscribers have a chance to connect before the first event.
    pub async fn bind(&self) -> Result<(), BusError> {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                BusState::Bound => return Ok(()),
                BusState::Closed => return Err(BusError::Closed),
                BusState::Unbound => {}
            }
            inner.transport.bind(&self.endpoint).await?;
            inner.state = BusState::Bound;
        }
        debug!(endpoint = %self.endpoint, delay = ?self.settle_delay, "settling");
        task::sleep(self.settle_delay).await;
        Ok(())
    }

    /// Sends one event and returns once the transport has taken it
    pub async fn publish(&self, event: &Event) -> Result<(), BusError> {
        let body = event.body();
        let mut inner = self.inner.lock().await;
        match inner.state {
            BusState::Unbound => return Err(BusError::NotBound),
            BusState::Closed => return Err(BusError::Closed),
            BusState::Bound => {}
        }
        inner.transport.send(TOPIC, &body).await?;
        debug!(%body, "published");
        Ok(())
    }

    pub async fn announce_mount(&self, root: &Path, user: &str) -> Result<(), BusError> {
        let event = Event::Mount {
            root: root.to_path_buf(),
            user: user.to_owned(),
        };
        self.publish(&event).await
    }

    pub async fn announce_unmount(&self) -> Result<(), BusError> {
        self.publish(&Event::Unmount).await
    }

    /// Closes the endpoint. Later publishes fail with [`BusError::Closed`].
    pub async fn shutdown(&self) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        let was = inner.state;
        inner.state = BusState::Closed;
        if was == BusState::Bound {
            inner.transport.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{BusError, Transport};

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    type Hook = Box<dyn Fn(&str) + Send + Sync>;

    /// Records every sent body. Clones share the same log.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail: Arc<AtomicBool>,
        hook: Arc<Mutex<Option<Hook>>>,
    }

    impl Recorder {
        pub(crate) fn bodies(&self) -> Vec<String> {
            self.log.lock().clone()
        }

        /// Makes every later send fail
        pub(crate) fn fail_sends(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Runs `hook` with each body at the moment it is sent
        pub(crate) fn on_send(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
            *self.hook.lock() = Some(Box::new(hook));
        }

        pub(crate) fn transport(&self) -> Box<dyn Transport> {
            Box::new(self.clone())
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn bind(&mut self, _: &str) -> Result<(), BusError> {
            Ok(())
        }

        async fn send(&mut self, topic: &str, body: &str) -> Result<(), BusError> {
            assert_eq!(topic, "guldfs");
            if self.fail.load(Ordering::SeqCst) {
                return Err(BusError::Send {
                    reason: "recorder told to fail".into(),
                });
            }
            if let Some(ref hook) = *self.hook.lock() {
                hook(body);
            }
            self.log.lock().push(body.to_owned());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), BusError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Recorder;
    use super::*;
    use crate::resolver::VirtualPath;

    use async_std::future::timeout;
    use async_std::task::block_on;
    use zeromq::{SocketRecv, SubSocket};

    fn recording_bus() -> (NotificationBus, Recorder) {
        let recorder = Recorder::default();
        let bus = NotificationBus::with_transport(recorder.transport(), "inproc", Duration::ZERO);
        (bus, recorder)
    }

    #[test]
    fn publish_requires_bind() {
        block_on(async {
            let (bus, recorder) = recording_bus();
            let err = bus.announce_unmount().await.unwrap_err();
            assert!(matches!(err, BusError::NotBound));

            bus.bind().await.unwrap();
            bus.announce_mount(Path::new("/home"), "isysd").await.unwrap();
            bus.shutdown().await.unwrap();

            let err = bus.announce_unmount().await.unwrap_err();
            assert!(matches!(err, BusError::Closed));
            assert!(matches!(bus.bind().await, Err(BusError::Closed)));

            assert_eq!(recorder.bodies(), vec!["mount:/home:isysd".to_owned()]);
        });
    }

    #[test]
    fn publish_keeps_order() {
        block_on(async {
            let (bus, recorder) = recording_bus();
            bus.bind().await.unwrap();
            for name in &["/a", "/b", "/c"] {
                let event = Event::Unlink {
                    path: VirtualPath::from(*name),
                };
                bus.publish(&event).await.unwrap();
            }
            assert_eq!(recorder.bodies(), vec!["unlink:/a", "unlink:/b", "unlink:/c"]);
        });
    }

    #[test]
    fn send_failure_is_reported() {
        block_on(async {
            let (bus, recorder) = recording_bus();
            bus.bind().await.unwrap();
            recorder.fail_sends(true);
            let err = bus.announce_unmount().await.unwrap_err();
            assert!(matches!(err, BusError::Send { .. }));
            assert!(recorder.bodies().is_empty());
        });
    }

    #[test]
    fn settle_delay_is_waited() {
        block_on(async {
            let recorder = Recorder::default();
            let bus = NotificationBus::with_transport(
                recorder.transport(),
                "inproc",
                Duration::from_millis(50),
            );
            let start = std::time::Instant::now();
            bus.bind().await.unwrap();
            assert!(start.elapsed() >= Duration::from_millis(50));
        });
    }

    #[test]
    fn zmq_subscriber_receives_two_frames() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let endpoint = format!("ipc://{}", dir.path().join("bus.ipc").display());
            let bus = NotificationBus::new(endpoint.clone(), Duration::ZERO);
            bus.bind().await.unwrap();

            let mut sub = SubSocket::new();
            sub.connect(&endpoint).await.unwrap();
            sub.subscribe(TOPIC).await.unwrap();

            let event = Event::Unlink {
                path: VirtualPath::from("/a"),
            };

            // a new subscriber misses messages sent before its subscription lands
            let message = timeout(Duration::from_secs(10), async {
                loop {
                    bus.publish(&event).await.unwrap();
                    if let Ok(Ok(message)) = timeout(Duration::from_millis(100), sub.recv()).await
                    {
                        return message;
                    }
                }
            })
            .await
            .unwrap();

            assert_eq!(message.len(), 2);
            assert_eq!(message.get(0).unwrap().as_ref(), b"guldfs");
            assert_eq!(message.get(1).unwrap().as_ref(), b"unlink:/a");

            bus.shutdown().await.unwrap();
        });
    }
}
