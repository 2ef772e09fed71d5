use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into two families with very different severity. Resolution errors
/// ([`Error::MissingReference`], [`Error::ImageNotFound`]) mean the supplied program image no
/// longer matches the shape the rewrite plan expects - they are fatal for the whole rewrite
/// session and must abort it before any output is written. Everything else covers malformed
/// input containers, encoding limits, and I/O.
#[derive(Error, Debug)]
pub enum Error {
    /// A type, method, or field named by a rewrite plan does not exist in the supplied image.
    ///
    /// This is the version-mismatch case: the target program was updated and no longer has
    /// the member the splice expects. Fatal for the whole session - a half-patched binary
    /// must never be produced.
    #[error("Missing {kind} reference: {declaring_type}::{name} (is the target image the expected version?)")]
    MissingReference {
        /// What kind of member was looked up ("type", "method", "field")
        kind: &'static str,
        /// Full name of the declaring type that was searched
        declaring_type: String,
        /// Name of the member that could not be found
        name: String,
    },

    /// A dependency image could not be located in any configured search directory.
    #[error("Image not found: {name} {version} (searched {searched} directories)")]
    ImageNotFound {
        /// Module name of the missing dependency
        name: String,
        /// Version requested by the dependent image
        version: String,
        /// Number of search directories probed
        searched: usize,
    },

    /// The input container is damaged and could not be parsed.
    ///
    /// Includes the source location where the malformation was detected for debugging.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// A method body needs more local variable slots than the 8-bit indexed
    /// load/store forms can address.
    ///
    /// The compact encoding caps a body at 256 locals; this is a limitation of the
    /// target bytecode format, surfaced rather than silently miscompiled.
    #[error("Method body exceeds the 256 local variable slot limit")]
    LocalSlotLimit,

    /// A short-form branch displacement did not fit its single-byte encoding at write time.
    ///
    /// Structurally unreachable after the final branch fix-up pass; if it surfaces, a
    /// splice bypassed [`crate::rewrite::upgrade_branches`].
    #[error("Short-form branch at offset {offset:#x} has displacement {displacement} outside i8 range")]
    BranchOutOfRange {
        /// Byte offset of the offending branch instruction
        offset: u32,
        /// The computed displacement that did not fit
        displacement: i64,
    },

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
