use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, OwnedFd};

/// Descriptor-backed feed whose blocking reads end as soon as the paired
/// [`FeedCloser`] is dropped.
pub(crate) struct InterruptibleFeed {
    feed: File,
    wake: OwnedFd,
}

/// Write end of the wake pipe. Dropping it hangs up the pipe, which the
/// reader treats as end-of-stream.
pub(crate) struct FeedCloser {
    _wake: OwnedFd,
}

pub(crate) fn interruptible(feed: OwnedFd) -> io::Result<(InterruptibleFeed, FeedCloser)> {
    let (wake, closer) = pipe2(OFlag::O_CLOEXEC)?;
    Ok((
        InterruptibleFeed {
            feed: File::from(feed),
            wake,
        },
        FeedCloser { _wake: closer },
    ))
}

impl Read for InterruptibleFeed {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (readable, woken) = {
                let mut fds = [
                    PollFd::new(self.feed.as_fd(), PollFlags::POLLIN),
                    PollFd::new(self.wake.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(err) => return Err(err.into()),
                }
                let ready = |fd: &PollFd<'_>| fd.revents().is_some_and(|events| !events.is_empty());
                (ready(&fds[0]), ready(&fds[1]))
            };
            if woken {
                return Ok(0);
            }
            if readable {
                return self.feed.read(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    #[test_timeout::timeout]
    fn reads_pass_through_until_closed() {
        let (read, write) = nix::unistd::pipe().unwrap();
        let (mut feed, closer) = interruptible(read).unwrap();
        let mut writer = File::from(write);
        writer.write_all(b"start\n").unwrap();

        let mut buf = [0u8; 16];
        let n = feed.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"start\n");

        // the writer is still open, so only the closer can end this read
        let blocked = thread::spawn(move || feed.read(&mut [0u8; 16]).unwrap());
        drop(closer);
        assert_eq!(blocked.join().unwrap(), 0);
    }

    #[test_timeout::timeout]
    fn hang_up_reads_as_end_of_stream() {
        let (read, write) = nix::unistd::pipe().unwrap();
        let (mut feed, _closer) = interruptible(read).unwrap();
        drop(write);
        assert_eq!(feed.read(&mut [0u8; 4]).unwrap(), 0);
    }
}
