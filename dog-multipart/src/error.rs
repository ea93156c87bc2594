use std::path::PathBuf;

use thiserror::Error;

/// Result type for multipart operations
pub type MultipartResult<T> = Result<T, MultipartError>;

/// Boxed error carried by filter and parser failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Parser limits that a part source enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    /// Total number of parts (files + fields)
    Parts,
    /// Number of file parts
    Files,
    /// Number of non-file fields
    Fields,
    /// Size of a single file in bytes
    FileSize,
    /// Size of a field name in bytes
    FieldNameSize,
    /// Size of a non-file field value in bytes
    FieldSize,
    /// Number of header pairs in a single part
    HeaderPairs,
}

impl Limit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Limit::Parts => "parts",
            Limit::Files => "files",
            Limit::Fields => "fields",
            Limit::FileSize => "fileSize",
            Limit::FieldNameSize => "fieldNameSize",
            Limit::FieldSize => "fieldSize",
            Limit::HeaderPairs => "headerPairs",
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carried inside an `io::Error` when a limit trips while a body is read.
#[derive(Debug)]
pub(crate) struct LimitBreach {
    pub limit: Limit,
    pub max: u64,
}

impl std::fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reach {} limit (max: {})", self.limit, self.max)
    }
}

impl std::error::Error for LimitBreach {}

/// Flat classification of [`MultipartError`], handy for matching in adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnexpectedField,
    FieldCountExceeded,
    FilterRejectedWithError,
    DirectoryCreationFailed,
    WriteFailed,
    StreamError,
    LimitExceeded,
    InvalidMultipart,
    ProtoViolation,
    PartNotConsumed,
    BodyConsumed,
    Source,
}

/// Errors that abort a multipart operation
#[derive(Error, Debug)]
pub enum MultipartError {
    #[error("Unexpected field: {field}")]
    UnexpectedField { field: String },

    #[error("Reach files limit: field '{field}' received {received} files (max: {max_count})")]
    FieldCountExceeded {
        field: String,
        max_count: usize,
        received: usize,
    },

    #[error("File filter rejected part with error: {source}")]
    FilterRejectedWithError {
        #[source]
        source: BoxError,
    },

    #[error("Failed to create destination directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while reading field '{field}': {source}")]
    StreamError {
        field: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Reach {limit} limit (max: {max})")]
    LimitExceeded { limit: Limit, max: u64 },

    #[error("The request is not multipart: {message}")]
    InvalidMultipart { message: String },

    #[error("Prototype property is not allowed as field name: {field}")]
    ProtoViolation { field: String },

    #[error("Part for field '{field}' was neither read to end nor drained")]
    PartNotConsumed { field: String },

    #[error("Byte stream of field '{field}' was already consumed")]
    BodyConsumed { field: String },

    #[error("Multipart source error: {source}")]
    Source {
        #[source]
        source: BoxError,
    },
}

impl MultipartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnexpectedField { .. } => ErrorKind::UnexpectedField,
            Self::FieldCountExceeded { .. } => ErrorKind::FieldCountExceeded,
            Self::FilterRejectedWithError { .. } => ErrorKind::FilterRejectedWithError,
            Self::DirectoryCreationFailed { .. } => ErrorKind::DirectoryCreationFailed,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::StreamError { .. } => ErrorKind::StreamError,
            Self::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            Self::InvalidMultipart { .. } => ErrorKind::InvalidMultipart,
            Self::ProtoViolation { .. } => ErrorKind::ProtoViolation,
            Self::PartNotConsumed { .. } => ErrorKind::PartNotConsumed,
            Self::BodyConsumed { .. } => ErrorKind::BodyConsumed,
            Self::Source { .. } => ErrorKind::Source,
        }
    }

    /// Create an unexpected field error
    pub fn unexpected_field<S: Into<String>>(field: S) -> Self {
        Self::UnexpectedField {
            field: field.into(),
        }
    }

    /// Create a field count error
    pub fn field_count_exceeded<S: Into<String>>(field: S, max_count: usize, received: usize) -> Self {
        Self::FieldCountExceeded {
            field: field.into(),
            max_count,
            received,
        }
    }

    /// Wrap an error signaled by a file filter
    pub fn filter<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::FilterRejectedWithError {
            source: error.into(),
        }
    }

    /// Create a parser limit error
    pub fn limit(limit: Limit, max: u64) -> Self {
        Self::LimitExceeded { limit, max }
    }

    /// Create an invalid multipart error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidMultipart {
            message: message.into(),
        }
    }

    /// Wrap a failure of the underlying parser
    pub fn parser<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Source {
            source: error.into(),
        }
    }

    /// Create a stream error for the given field
    pub fn stream<S: Into<String>>(field: S, source: std::io::Error) -> Self {
        Self::StreamError {
            field: field.into(),
            source,
        }
    }
}

impl MultipartError {
    /// Classify an I/O failure raised while reading the body of `field`.
    pub(crate) fn from_io<S: Into<String>>(field: S, err: std::io::Error) -> Self {
        if let Some(breach) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<LimitBreach>())
        {
            return Self::limit(breach.limit, breach.max);
        }
        Self::stream(field, err)
    }
}

impl From<multer::Error> for MultipartError {
    fn from(err: multer::Error) -> Self {
        match err {
            multer::Error::FieldSizeExceeded { limit, .. } => Self::limit(Limit::FileSize, limit),
            multer::Error::StreamSizeExceeded { limit } => Self::limit(Limit::FileSize, limit),
            multer::Error::NoMultipart | multer::Error::NoBoundary => Self::invalid(err.to_string()),
            multer::Error::DecodeContentType(_) => Self::invalid(err.to_string()),
            other => Self::parser(other),
        }
    }
}
