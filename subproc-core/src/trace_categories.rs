//! Trace utilities

/// Trace category for process creation, exit and release.
pub const PROCESS: &str = "process";
/// Trace category for pipe I/O.
pub const PIPE: &str = "pipe";
/// Trace category for stop sequences.
pub const STOP: &str = "stop";
