pub(crate) mod errno;
pub(crate) mod pipe;
pub(crate) mod process;
pub(crate) mod stdio;
