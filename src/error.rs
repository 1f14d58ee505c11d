//! # Typed Failure Signals
//!
//! Everything fallible in this crate returns `eyre::Result`, with context
//! attached at the failure site (`wrap_err_with`) the same way the storage
//! layer reports file paths and offsets. A handful of conditions are part
//! of the API contract rather than diagnostics though: a drained topic, a
//! closed topic, a corrupt index. Those are raised as [`Error`] values
//! inside the `eyre::Report` so callers can branch on them:
//!
//! ```ignore
//! match topic.get() {
//!     Ok(msg) => consume(msg),
//!     Err(e) if Error::is(&e, Error::EndOfFile) => break,
//!     Err(e) => return Err(e),
//! }
//! ```

use std::fmt;

/// Failure conditions that callers are expected to match on.
///
/// Anything not listed here (I/O failures, geometry validation, map
/// failures) is reported as a plain `eyre` error with context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No more data at this offset / no pending message in this topic.
    EndOfFile,
    /// A block's header claims more valid bytes than its payload holds.
    UnexpectedEndOfFile,
    /// A block cannot absorb the requested bytes.
    ShortWrite,
    /// Slot magic missing. Ends the scan of a round; fatal elsewhere.
    NotABlock,
    /// The round has no free slot left.
    FullRound,
    /// A round file on disk differs from its computed size.
    SizeMismatch,
    /// Round files on disk are not exactly 0..n.
    LoadGap,
    /// CRC mismatch on a topic's 48-byte index.
    BrokenIndex,
    /// The topic has been closed.
    ClosedTopic,
}

impl Error {
    /// True iff `report` was raised as this exact signal.
    pub fn is(report: &eyre::Report, kind: Error) -> bool {
        report.downcast_ref::<Error>() == Some(&kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::EndOfFile => "end of file",
            Error::UnexpectedEndOfFile => "unexpected end of file",
            Error::ShortWrite => "short write",
            Error::NotABlock => "not a block",
            Error::FullRound => "full round",
            Error::SizeMismatch => "size mismatch",
            Error::LoadGap => "round files are not contiguous",
            Error::BrokenIndex => "broken index",
            Error::ClosedTopic => "closed topic",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}
