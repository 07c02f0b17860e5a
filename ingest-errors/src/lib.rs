//! Error types shared by the ingestion scheduler crates.
//!
//! Mirrors the error-policy table of the scheduler design: each variant here
//! corresponds to exactly one row of that table, and call sites match errors
//! to variants rather than inventing ad hoc `String` messages.

use std::fmt;

/// The result type used throughout the ingestion scheduler.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Errors produced by the dispatch queue, scheduler, writer jobs, and the
/// out-of-order merge planner.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The table's writer is currently locked by another process or thread.
    /// Retryable: the caller should keep the row buffered and try again.
    #[error("writer for table `{table}` is locked by another owner")]
    WriterUnavailable {
        /// Name of the table whose writer could not be acquired.
        table: String,
    },

    /// Physical table creation failed in the catalog façade.
    #[error("failed to create table `{table}`: {source}")]
    TableCreation {
        /// Name of the table that failed to be created.
        table: String,
        /// Underlying failure reported by the catalog façade.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A column name or string/tag value failed UTF-8 decoding.
    #[error("invalid UTF-8 while decoding {context}")]
    Utf8Decode {
        /// What was being decoded (e.g. "column name", "tag value").
        context: &'static str,
        #[source]
        source: std::str::Utf8Error,
    },

    /// A column name contains characters that are not allowed in column
    /// names.
    #[error("column name `{name}` is not a valid column name")]
    InvalidColumnName {
        /// The offending name.
        name: String,
    },

    /// An integer value did not fit within the bounds of its target column
    /// type (INT/SHORT/BYTE narrowing).
    #[error("value {value} does not fit in column `{column}` of type {target_type}")]
    IntegerOutOfBounds {
        /// Name of the column being written.
        column: String,
        /// The type the column was narrowed to.
        target_type: &'static str,
        /// The out-of-range value.
        value: i64,
    },

    /// The wire entity carried a type code the writer does not recognise.
    #[error("unknown entity type code {code} for column `{column}`")]
    UnknownEntityType {
        /// Name of the column the entity targeted.
        column: String,
        /// The unrecognised type discriminant.
        code: i8,
    },

    /// An entity's value cannot be applied to its column's existing
    /// storage type (e.g. a `STRING` field arriving for a column the
    /// catalog already knows as `LONG`).
    #[error("column `{column}` is of type {actual}, cannot accept a {expected} value")]
    TypeMismatch {
        /// Name of the column being written.
        column: String,
        /// The type the incoming value would need the column to be.
        expected: &'static str,
        /// The column's actual type, from the catalog.
        actual: &'static str,
    },

    /// A file I/O operation failed while planning or executing an
    /// out-of-order merge. Carries the platform `errno` when available.
    #[error("I/O error during merge planning on `{path}`: {source}")]
    Io {
        /// Path of the file involved.
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// An invariant that should always hold was violated. Used by the
    /// [`invariant!`] macro in place of a panic on the hot path.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl IngestError {
    /// The `errno` attached to this error, if it originated from an I/O
    /// failure.
    pub fn errno(&self) -> Option<i32> {
        match self {
            IngestError::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Constructs an [`IngestError::Internal`] from a format string, mirroring
/// the call sites that would otherwise panic on a broken invariant.
#[macro_export]
macro_rules! internal {
    ($($tt:tt)*) => {
        $crate::IngestError::Internal(format!($($tt)*))
    };
}

/// Returns early with an [`IngestError::Internal`] unless the condition
/// holds. Used in place of `assert!` on paths that must return a `Result`
/// rather than abort the process.
#[macro_export]
macro_rules! invariant {
    ($cond:expr) => {
        if !$cond {
            return Err($crate::internal!(
                "invariant failed: {}",
                stringify!($cond)
            ));
        }
    };
    ($cond:expr, $($tt:tt)*) => {
        if !$cond {
            return Err($crate::internal!($($tt)*));
        }
    };
}

/// A lightweight wrapper used when a foreign error type needs to be boxed
/// into [`IngestError::TableCreation`] without pulling in the concrete
/// catalog façade's error type as a dependency.
#[derive(Debug)]
pub struct OpaqueError(pub String);

impl fmt::Display for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpaqueError {}
