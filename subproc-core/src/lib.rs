//! Core of the subproc engine: starts an external program, exchanges bytes with it over its
//! standard streams and reliably stops it, with the same semantics on POSIX and Windows.
//!
//! The entry point is [`Process`]. A process record is created empty, started with a
//! command and a set of [`Options`], driven with blocking, timeout-bounded primitives
//! ([`Process::read`], [`Process::write`], [`Process::wait`], ...) and finally stopped with
//! an ordered list of [`StopActions`]. Dropping a record that is still running runs its
//! configured stop sequence before every OS resource is released.
//!
//! ```no_run
//! use std::time::Duration;
//! use subproc_core::{Options, Process, StopAction, StopActions, Timeout};
//!
//! # fn main() -> subproc_core::Result<()> {
//! let mut process = Process::new();
//! process.start(
//!     &["cat"],
//!     Options::builder().timeout(Duration::from_secs(5)).build(),
//! )?;
//!
//! process.write_all(b"hello")?;
//! process.close(subproc_core::Stream::In)?;
//!
//! let mut output = Vec::new();
//! process.drain(&mut output, &mut std::io::sink())?;
//!
//! let status = process.stop(StopActions::new([
//!     StopAction::wait(Timeout::After(Duration::from_secs(1))),
//!     StopAction::terminate(Timeout::After(Duration::from_millis(500))),
//!     StopAction::kill(Timeout::Infinite),
//! ]))?;
//! assert!(status.success());
//! # Ok(())
//! # }
//! ```

mod bootstrap;
mod error;
mod handle;
mod options;
mod pipe;
mod process;
mod redirect;
mod run;
mod status;
mod stop;
mod sys;
mod timing;
pub mod trace_categories;

pub use error::{Error, Result};
pub use options::{Environment, Options, Redirects};
pub use process::{ForkRole, Process};
pub use redirect::{Redirect, Stream};
pub use run::run;
pub use status::ExitStatus;
pub use stop::{Stop, StopAction, StopActions};
pub use timing::Timeout;
