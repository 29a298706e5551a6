//! Cursor-driven batch migration.

/// Generic batch migrator and its report types.
pub mod migrator;
