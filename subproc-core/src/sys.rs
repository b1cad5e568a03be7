//! Platform abstraction facilities

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;
#[cfg(windows)]
pub(crate) use windows as platform;

pub(crate) use platform::errno;
pub(crate) use platform::pipe;
pub(crate) use platform::process;
pub(crate) use platform::stdio;
