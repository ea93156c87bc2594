//! dog-multipart-axum: Axum adapter for dog-multipart.
//!
//! Exposes the four upload operations as tower layers, an extractor for
//! handlers that run them themselves, and the HTTP translation of upload
//! errors.

mod error;
mod extract;
mod filter;
mod layer;

pub use error::{HttpErrorKind, UploadError};
pub use extract::{FileSummary, MultipartUpload, UploadedFiles};
pub use filter::{RequestFileFilter, RequestHead};
pub use layer::{UploadLayer, UploadService};

pub use dog_multipart;
