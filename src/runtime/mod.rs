//! Runs a migration plan off the async executor and streams its progress.

/// Event stream types emitted by the runtime.
pub mod events;
/// Run plan, handle, and worker implementation.
pub mod handle;
