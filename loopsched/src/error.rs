//! The two error taxa of the engine.
//!
//! A [`SchedulingError`] is expected and user-facing: the targeted rewrite is
//! not valid at the chosen site.  It carries the offending source location
//! and a one-line explanation, and the directive that raised it performed no
//! partial rewrite.
//!
//! An [`InvalidCursorError`] is a programmer error: a cursor was used after
//! its target was deleted or altered without forwarding, or against the
//! wrong root.  It reports the path that failed to resolve.

use std::fmt;

use loopsched_ir::SrcInfo;

#[derive(Clone, Debug)]
pub struct SchedulingError {
    msg: String,
    srcinfo: SrcInfo,
}

impl SchedulingError {
    pub fn new(msg: impl Into<String>, srcinfo: &SrcInfo) -> SchedulingError {
        SchedulingError {
            msg: msg.into(),
            srcinfo: srcinfo.clone(),
        }
    }

    /// An error with no better location than the procedure itself.
    pub fn misc(msg: impl Into<String>) -> SchedulingError {
        SchedulingError {
            msg: msg.into(),
            srcinfo: SrcInfo::unknown(),
        }
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.srcinfo, self.msg)
    }
}

#[derive(Clone, Debug)]
pub struct InvalidCursorError {
    /// Rendered form of the path that failed to resolve.
    pub path: String,
    pub reason: String,
}

impl InvalidCursorError {
    pub fn new(path: String, reason: impl Into<String>) -> InvalidCursorError {
        InvalidCursorError {
            path,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for InvalidCursorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid cursor at {}: {}", self.path, self.reason)
    }
}

#[derive(Clone, Debug)]
pub enum Error {
    Scheduling(SchedulingError),
    InvalidCursor(InvalidCursorError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Scheduling(e) => e.fmt(f),
            Error::InvalidCursor(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<SchedulingError> for Error {
    fn from(e: SchedulingError) -> Error {
        Error::Scheduling(e)
    }
}

impl From<InvalidCursorError> for Error {
    fn from(e: InvalidCursorError) -> Error {
        Error::InvalidCursor(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
