//! # dog-multipart: Streaming file uploads out of multipart bodies
//!
//! `dog-multipart` pulls the file parts of a `multipart/form-data` body one at
//! a time, filters them, routes them to logical fields and either writes them
//! to disk or hands them back in memory.
//!
//! ## Key Features
//!
//! - **Single pass**: parts are read in arrival order, every skipped part is drained
//! - **Four routing modes**: `file`, `files`, `any` and `file_fields`
//! - **Per-field count limits**: undeclared fields and overfull fields fail the upload
//! - **Collision-free names**: files land as `<random id>.<original extension>`
//! - **All or nothing**: a failed operation removes the files it already wrote
//! - **Server agnostic**: any byte stream works; `dog-multipart-axum` wires it into axum
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_multipart::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> MultipartResult<()> {
//! let dir = std::env::temp_dir().join("dog-multipart-doc");
//! let wrapper = MultipartWrapper::new(
//!     MultipartOptions::new()
//!         .with_dest(&dir)
//!         .allow_mime_type("image/png"),
//! );
//!
//! let source = MemoryPartSource::new()
//!     .file("photos", "a.png", "image/png", "first")
//!     .file("photos", "b.gif", "image/gif", "skipped")
//!     .file("photos", "c.png", "image/png", "second");
//!
//! let files = wrapper.files("photos", None, source).await?.unwrap_or_default();
//! assert_eq!(files.len(), 2);
//! assert_eq!(files[0].original_name(), "a.png");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ MultipartWrapper │  ← file / files / any / file_fields
//! ├──────────────────┤
//! │ Router           │  ← gate + FilterStage, drains what it skips
//! ├──────────────────┤
//! │ PartSource       │  ← multer or in-memory parts
//! └──────────────────┘
//!          │
//!          ▼
//!   DiskStorage / in-memory descriptors
//! ```

mod assembler;
mod error;
pub mod filter;
mod options;
mod part;
mod result;
mod router;
pub mod source;
pub mod storage;
mod wrapper;

pub use error::{BoxError, ErrorKind, Limit, MultipartError, MultipartResult};
pub use filter::{FileFilter, FilterDecision, FilterStage};
pub use options::{Limits, MultipartOptions, UploadField};
pub use part::{
    BodyState, BodyTracker, ByteStream, FieldEntry, FieldsSnapshot, FileHeaders, MultipartPart,
    PartBody,
};
pub use result::{FileFieldMap, UploadedFile};
pub use router::{Router, RouterState};
pub use source::{MemoryPartSource, MulterPartSource, PartSource, SourceKind, SourceLimits};
pub use storage::{DiskStorage, NameGenerator, PersistedFile, UuidNames};
pub use wrapper::{MultipartWrapper, UploadOperation, UploadOutcome};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        FilterDecision, Limits, MemoryPartSource, MulterPartSource, MultipartError,
        MultipartOptions, MultipartPart, MultipartResult, MultipartWrapper, PartSource,
        UploadField, UploadOperation, UploadOutcome, UploadedFile,
    };
}
