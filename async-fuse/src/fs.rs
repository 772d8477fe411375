use crate::context::{FuseContext, ProtocolVersion};
use crate::ops::Operation;

use std::io;

/// A file system served by [`Server`](crate::Server)
#[async_trait::async_trait]
pub trait FileSystem: Sync {
    /// Called once the kernel has sent `FUSE_INIT`, before the reply.
    /// An error aborts the initialization.
    #[inline]
    async fn init(&self, proto: ProtocolVersion) -> io::Result<()> {
        let _ = proto;
        Ok(())
    }

    /// Handles one request. `FUSE_INIT` and `FUSE_DESTROY` never reach it.
    async fn dispatch<'b, 'a: 'b>(
        &'a self,
        cx: FuseContext<'b>,
        op: Operation<'b>,
    ) -> io::Result<()>;

    /// Called when the kernel sends `FUSE_DESTROY` or the connection goes away.
    #[inline]
    async fn destroy(&self) {}
}
