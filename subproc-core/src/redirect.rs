//! Producing the child's standard streams.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::pipe::{self, PipeReader, PipeWriter};
use crate::sys;
use crate::sys::stdio::ChildEnd;
use crate::trace_categories;

/// Identifies one of a child's standard streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Standard input.
    In,
    /// Standard output.
    Out,
    /// Standard error.
    Err,
}

/// Where a child's standard stream is connected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Redirect {
    /// A new pipe between this process and the child.
    #[default]
    Pipe,
    /// This process's own corresponding stream. Falls back to [`Redirect::Discard`] if that
    /// stream is closed.
    Inherit,
    /// The null device: reads see end of stream and writes are dropped.
    Discard,
    /// A file. Standard input opens it for reading; output streams create it if needed and
    /// truncate it.
    Path(PathBuf),
    /// The same target as the child's standard output. Only valid for standard error.
    Stdout,
}

/// The two ends produced for one stream. The parent end only exists for [`Redirect::Pipe`].
#[derive(Debug)]
pub(crate) struct Redirection<P> {
    pub parent: Option<P>,
    pub child: ChildEnd,
}

/// Produces the child's standard input.
pub(crate) fn input(redirect: &Redirect) -> Result<Redirection<PipeWriter>> {
    if *redirect == Redirect::Pipe {
        let (reader, writer) = pipe::create()?;
        sys::pipe::prepare_writer(&writer)?;
        return Ok(Redirection {
            parent: Some(writer),
            child: reader.into(),
        });
    }

    Ok(Redirection {
        parent: None,
        child: non_pipe(Stream::In, redirect, None)?,
    })
}

/// Produces the child's standard output or standard error. `stdout` is the child's end of
/// standard output, which standard error may share.
pub(crate) fn output(
    stream: Stream,
    redirect: &Redirect,
    stdout: Option<&ChildEnd>,
) -> Result<Redirection<PipeReader>> {
    if *redirect == Redirect::Pipe {
        let (reader, writer) = pipe::create()?;
        sys::pipe::prepare_reader(&reader)?;
        return Ok(Redirection {
            parent: Some(reader),
            child: writer.into(),
        });
    }

    Ok(Redirection {
        parent: None,
        child: non_pipe(stream, redirect, stdout)?,
    })
}

fn non_pipe(stream: Stream, redirect: &Redirect, stdout: Option<&ChildEnd>) -> Result<ChildEnd> {
    match redirect {
        Redirect::Inherit => inherit(stream, sys::stdio::duplicate_parent(stream)?),
        Redirect::Discard => discard(stream),
        Redirect::Path(path) => open(stream, path),
        Redirect::Stdout => match (stream, stdout) {
            (Stream::Err, Some(stdout)) => Ok(stdout.try_clone()?),
            _ => Err(Error::InvalidArgument),
        },
        Redirect::Pipe => Err(Error::InvalidArgument),
    }
}

/// Hands the child this process's own stream, or the null device when that stream is closed.
fn inherit(stream: Stream, parent: Option<ChildEnd>) -> Result<ChildEnd> {
    match parent {
        Some(end) => Ok(end),
        None => {
            tracing::debug!(
                target: trace_categories::PROCESS,
                "parent {stream:?} is closed; discarding instead"
            );
            discard(stream)
        }
    }
}

fn discard(stream: Stream) -> Result<ChildEnd> {
    let file = OpenOptions::new()
        .read(stream == Stream::In)
        .write(stream != Stream::In)
        .open(sys::stdio::NULL_DEVICE)?;
    Ok(file.into())
}

fn open(stream: Stream, path: &Path) -> Result<ChildEnd> {
    let file = if stream == Stream::In {
        OpenOptions::new().read(true).open(path)?
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?
    };
    Ok(file.into())
}
