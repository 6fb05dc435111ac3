//! Output mode plumbing shared by every command.

/// How command results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable lines on stdout.
    Human,
    /// One JSON document on stdout.
    Json,
}
