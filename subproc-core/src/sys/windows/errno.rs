//! Raw error codes the engine gives names to.

use windows::Win32::Foundation;

pub(crate) const INVALID_ARGUMENT: i32 = Foundation::ERROR_INVALID_PARAMETER.0 as i32;
pub(crate) const NOT_FOUND: i32 = Foundation::ERROR_FILE_NOT_FOUND.0 as i32;
pub(crate) const TIMED_OUT: i32 = Foundation::WAIT_TIMEOUT.0 as i32;
pub(crate) const BROKEN_PIPE: i32 = Foundation::ERROR_BROKEN_PIPE.0 as i32;
pub(crate) const OUT_OF_MEMORY: i32 = Foundation::ERROR_NOT_ENOUGH_MEMORY.0 as i32;
pub(crate) const IN_PROGRESS: i32 = Foundation::ERROR_IO_PENDING.0 as i32;

/// Reported when a failure carries no OS code of its own.
pub(crate) const UNKNOWN: i32 = Foundation::ERROR_GEN_FAILURE.0 as i32;

/// Written to a pipe whose read end has been closed.
pub(crate) const NO_DATA: i32 = Foundation::ERROR_NO_DATA.0 as i32;

/// Recovers the Win32 error code wrapped in a `windows` crate error.
pub(crate) fn to_io(error: &windows::core::Error) -> std::io::Error {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    let hresult = error.code().0 as u32;

    // HRESULT_FROM_WIN32 places Win32 codes in the 0x8007 facility.
    #[allow(clippy::cast_possible_wrap)]
    if hresult & 0xFFFF_0000 == 0x8007_0000 {
        std::io::Error::from_raw_os_error((hresult & 0xFFFF) as i32)
    } else {
        std::io::Error::from_raw_os_error(hresult as i32)
    }
}

impl From<windows::core::Error> for crate::Error {
    fn from(error: windows::core::Error) -> Self {
        Self::from(to_io(&error))
    }
}
