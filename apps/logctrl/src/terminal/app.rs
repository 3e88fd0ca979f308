use crate::client::viewer;
use crate::server::host::{self, HostIo};
use crate::server::pty::Command;
use crate::terminal::cli::Cli;
use crate::terminal::config::{HostConfig, LaunchRole};
use crate::terminal::error::HostError;
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, RawFd};
use tracing::{debug, info};

pub async fn run(cli: Cli, role: LaunchRole) -> Result<(), HostError> {
    match role {
        LaunchRole::Parent => {
            let config = HostConfig::new(Command::current_exe()?)
                .with_resize_failure(cli.resize_failure);
            let reason = host::run(config, HostIo::stdio()).await?;
            debug!(target = "host", ?reason, "parent exiting");
            Ok(())
        }
        LaunchRole::Child { feed_fd } => {
            let feed = adopt_feed(feed_fd)?;
            let options = cli.stream.to_options();
            info!(target = "viewer", feed_fd, "viewer starting");
            tokio::task::spawn_blocking(move || viewer::run(feed.into(), &options))
                .await
                .map_err(|err| HostError::Io(io::Error::other(err)))?
                .map_err(HostError::Viewer)
        }
    }
}

/// Takes ownership of the inherited feed descriptor, keeping it out of
/// anything the viewer might spawn.
fn adopt_feed(fd: RawFd) -> Result<File, HostError> {
    // SAFETY: fcntl only inspects and updates descriptor flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(HostError::FeedDescriptor {
            fd,
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } == -1 {
        return Err(HostError::FeedDescriptor {
            fd,
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: the descriptor is open and was handed to this process for
    // exclusive use; nothing else in the process refers to it.
    Ok(unsafe { File::from_raw_fd(fd) })
}
