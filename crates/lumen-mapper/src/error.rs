//! Error types for `when` expression parsing.
//!
//! String-indirection resolution (`program::resolve`) and out-of-range bin
//! indices are handled structurally — falling back to empty, or logging and
//! skipping the directive — rather than as `Result` errors, matching the
//! source's own silent-fallback behavior. The only failure mode that
//! actually surfaces as a `Result` is a malformed `when` expression.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapperError {
    #[error("`when` expression error at position {0}: {1}")]
    ExprSyntax(usize, String),
}
