//! Custom error types for capfilter operations.

use thiserror::Error;

/// Result type alias for capfilter operations
pub type Result<T> = std::result::Result<T, CapFilterError>;

/// Error type for capfilter operations
#[derive(Error, Debug)]
pub enum CapFilterError {
    /// A required column is absent from the input slice table
    #[error("Required column '{column}' not in slice table")]
    MissingColumn {
        /// The missing column name
        column: String,
    },

    /// A filter variant was constructed without any filter stages
    #[error("Filter stages not provided")]
    NoFilterStages,

    /// A stage referenced a filter operation the variant does not implement
    #[error("Filter operation '{operation}' is not supported by the {variant} variant")]
    UnsupportedOperation {
        /// The operation name as declared in the stage configuration
        operation: &'static str,
        /// The variant that rejected it
        variant: &'static str,
    },

    /// File format error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "slice table")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column() {
        let error = CapFilterError::MissingColumn { column: "parent_read".to_string() };
        let msg = format!("{error}");
        assert!(msg.contains("'parent_read'"));
        assert!(msg.contains("not in slice table"));
    }

    #[test]
    fn test_no_filter_stages() {
        let error = CapFilterError::NoFilterStages;
        assert_eq!(format!("{error}"), "Filter stages not provided");
    }

    #[test]
    fn test_unsupported_operation() {
        let error = CapFilterError::UnsupportedOperation {
            operation: "remove_excluded_slices",
            variant: "tiled",
        };
        let msg = format!("{error}");
        assert!(msg.contains("remove_excluded_slices"));
        assert!(msg.contains("tiled"));
    }

    #[test]
    fn test_invalid_file_format() {
        let error = CapFilterError::InvalidFileFormat {
            file_type: "slice table".to_string(),
            path: "/path/to/slices.tsv".to_string(),
            reason: "empty file".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("Invalid slice table file"));
        assert!(msg.contains("empty file"));
    }
}
