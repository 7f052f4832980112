//! Define the `Location`, `CompileError`, and `CompileResult` types.

#![macro_use]

use std::fmt;

/// The location of a token or error in the source file.
///
/// Lines and columns start from 1; the default location (0:0) is used for
/// diagnostics that cannot be pinned to a point in the input, such as an
/// unexpected end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A compile error carries the location it was detected at and a rendered
/// message. The driver prefixes the input path, producing the
/// `path:line:col: message` diagnostic format.
#[derive(Debug)]
pub struct CompileError {
    /// Location of the error.
    pub location: Location,
    /// Error message.
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Result of a fallible compilation step. The `CompileError` variant
/// includes a location.
pub type CompileResult<T> = Result<T, CompileError>;

// Create an `Err` variant of `CompileResult<X>` from a location and `format!` args.
macro_rules! err {
    ( $loc:expr, $msg:expr ) => {
        Err($crate::error::CompileError {
            location: $loc,
            message: $msg.to_string(),
        })
    };

    ( $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($crate::error::CompileError {
            location: $loc,
            message: format!( $fmt, $( $arg ),+ ),
        })
    };
}
