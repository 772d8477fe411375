use guldfs::{select_user, GuldFs, Identity, Mount, MountConfig, DEFAULT_ENDPOINT};

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_fuse::{MountOptions, Server};
use structopt::StructOpt;
use tracing::{debug, error};

#[derive(Debug, StructOpt)]
#[structopt(name = "guldfs", about = "Mount a user's view of the blocktree")]
struct Args {
    #[structopt(long, default_value = "/home", help = "The directory to mount over")]
    mountpoint: PathBuf,

    #[structopt(long, default_value = "/home/.blocktree", help = "The root of the blocktree")]
    blocktree: PathBuf,

    #[structopt(long, env = "GULD_USER", help = "The user whose subtree is mounted [default: $USER]")]
    user: Option<String>,

    #[structopt(long, help = "The owner of created files [default: the user]")]
    admin: Option<String>,

    #[structopt(long, help = "The notification endpoint [default: ipc:///tmp/guldfs0.ipc]")]
    endpoint: Option<String>,

    #[structopt(long, default_value = "500", help = "Milliseconds to wait for subscribers after binding")]
    settle_ms: u64,
}

impl Args {
    fn into_config(self) -> Result<MountConfig> {
        let user = select_user(self.user, env::var("USER").ok())?;
        let admin = Identity::lookup(self.admin.as_deref().unwrap_or(&user))?;

        let cwd = env::current_dir().context("failed to read the working directory")?;
        let config = MountConfig::new(cwd.join(&self.mountpoint), cwd.join(&self.blocktree), user, admin)?
            .endpoint(self.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned()))
            .settle_delay(Duration::from_millis(self.settle_ms));
        Ok(config)
    }
}

fn setup_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::fmt()
        .event_format(fmt::format().pretty())
        .with_env_filter(EnvFilter::from_default_env())
        .finish()
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<()> {
    setup_tracing();
    let args = Args::from_args();
    async_std::task::block_on(run(args))?;
    Ok(())
}

#[allow(clippy::unit_arg)]
#[tracing::instrument(err)]
async fn run(args: Args) -> Result<()> {
    let config = args.into_config()?;
    debug!(?config);

    let root = config.root.clone();
    let mount = Arc::new(Mount::new(config));
    mount.start().await?;

    let options = MountOptions {
        allow_other: true,
        default_permissions: false,
        fs_name: "guldfs".to_owned(),
    };
    let server = match Server::mount(root, GuldFs::new(Arc::clone(&mount)))
        .options(options)
        .initialize()
        .await
    {
        Ok(server) => server,
        Err(err) => {
            if let Err(err) = mount.destroy().await {
                error!(%err, "failed to release the notification bus");
            }
            return Err(anyhow::Error::new(err).context("failed to mount"));
        }
    };

    let served = server.run().await;
    mount.destroy().await?;
    served?;

    Ok(())
}
