use std::os::fd::{AsFd, OwnedFd};

use nix::errno::Errno;

use crate::error::Result;
use crate::redirect::Stream;

/// The child's side of a standard stream.
pub(crate) type ChildEnd = OwnedFd;

pub(crate) const NULL_DEVICE: &str = "/dev/null";

/// Duplicates one of this process's own standard streams so the child can share it. Returns
/// `None` when this process's stream is closed.
pub(crate) fn duplicate_parent(stream: Stream) -> Result<Option<ChildEnd>> {
    let duplicate = match stream {
        Stream::In => std::io::stdin().as_fd().try_clone_to_owned(),
        Stream::Out => std::io::stdout().as_fd().try_clone_to_owned(),
        Stream::Err => std::io::stderr().as_fd().try_clone_to_owned(),
    };

    match duplicate {
        Ok(fd) => Ok(Some(fd)),
        Err(e) if e.raw_os_error() == Some(Errno::EBADF as i32) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
