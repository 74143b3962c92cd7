//! Process management primitives for the capture and analysis collaborators
//!
//! Each platform family gets its own module with the same surface: spawn a
//! child in its own process tree, signal the tree gracefully, kill it
//! forcefully. The supervisor never calls these directly; it goes through the
//! [`ProcessAdapter`](crate::supervisor::ProcessAdapter) selected at startup.
//!
//! ## Platform Support
//!
//! - **Unix**: process groups via `setsid()`, `SIGTERM`/`SIGKILL` sent to the group
//! - **Windows**: a new console per child, `taskkill /T` then `taskkill /F /T`

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

/// How a child's standard streams are wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// stdout/stderr are piped back to the supervisor
    Piped,
    /// The child shares the parent's terminal
    Inherit,
    /// The child gets its own visible console window (Windows only; falls back
    /// to `Inherit` elsewhere)
    NewConsole,
}
