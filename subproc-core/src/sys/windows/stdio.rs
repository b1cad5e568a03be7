use std::os::windows::io::{AsHandle, AsRawHandle, BorrowedHandle, OwnedHandle};

use windows::Win32::Foundation::ERROR_INVALID_HANDLE;

use crate::error::Result;
use crate::redirect::Stream;

/// The child's side of a standard stream.
pub(crate) type ChildEnd = OwnedHandle;

pub(crate) const NULL_DEVICE: &str = "NUL";

/// Duplicates one of this process's own standard streams so the child can share it. Returns
/// `None` when this process has no such stream.
pub(crate) fn duplicate_parent(stream: Stream) -> Result<Option<ChildEnd>> {
    match stream {
        Stream::In => duplicate(std::io::stdin().as_handle()),
        Stream::Out => duplicate(std::io::stdout().as_handle()),
        Stream::Err => duplicate(std::io::stderr().as_handle()),
    }
}

fn duplicate(handle: BorrowedHandle<'_>) -> Result<Option<ChildEnd>> {
    if handle.as_raw_handle().is_null() {
        return Ok(None);
    }

    #[allow(clippy::cast_possible_wrap)]
    match handle.try_clone_to_owned() {
        Ok(owned) => Ok(Some(owned)),
        Err(e) if e.raw_os_error() == Some(ERROR_INVALID_HANDLE.0 as i32) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
