//! # Part sources
//!
//! A [`PartSource`] yields the file parts of one request, one at a time.
//! Sources are single pass: the body of the part handed out last must be
//! read to end, drained or destroyed before `next_part` is called again.
//! The router enforces that before every pull.
//!
//! Two sources ship with the crate:
//! - [`MulterPartSource`] parses a live request body with `multer`
//! - [`MemoryPartSource`] serves parts that are already in memory, either
//!   streamed one by one or fully materialized up front

use async_trait::async_trait;

use crate::{FieldsSnapshot, Limit, Limits, MultipartError, MultipartPart, MultipartResult};

mod memory;
mod multer_source;

pub use self::memory::MemoryPartSource;
pub use self::multer_source::MulterPartSource;

/// How a source produces its parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Parts arrive as the body is parsed; fields are only known once seen
    Streaming,
    /// Every field was parsed before the first part is handed out
    Materialized,
}

/// Single-pass sequence of multipart file parts
#[async_trait]
pub trait PartSource: Send {
    /// Next file part, or `None` once the body is exhausted.
    async fn next_part(&mut self) -> MultipartResult<Option<MultipartPart>>;

    fn kind(&self) -> SourceKind {
        SourceKind::Streaming
    }

    /// Complete field set of a materialized source.
    fn declared_fields(&self) -> Option<FieldsSnapshot> {
        None
    }

    /// Stop producing file parts beyond `max` for the rest of the request.
    fn cap_files(&mut self, max: usize);
}

#[async_trait]
impl<S> PartSource for Box<S>
where
    S: PartSource + ?Sized,
{
    async fn next_part(&mut self) -> MultipartResult<Option<MultipartPart>> {
        (**self).next_part().await
    }

    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn declared_fields(&self) -> Option<FieldsSnapshot> {
        (**self).declared_fields()
    }

    fn cap_files(&mut self, max: usize) {
        (**self).cap_files(max)
    }
}

/// Counters behind [`Limits`], shared by source implementations.
#[derive(Debug, Clone, Default)]
pub struct SourceLimits {
    limits: Limits,
    parts: usize,
    files: usize,
    fields: usize,
}

impl SourceLimits {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Tighten the file count limit; a looser cap never widens it.
    pub fn cap_files(&mut self, max: usize) {
        self.limits.files = Some(self.limits.files.map_or(max, |current| current.min(max)));
    }

    /// Validate a field name before anything else about the part is looked at.
    pub fn check_name(&self, name: &str) -> MultipartResult<()> {
        if name == "__proto__" {
            return Err(MultipartError::ProtoViolation {
                field: name.to_string(),
            });
        }
        if let Some(max) = self.limits.field_name_size {
            if name.len() > max {
                return Err(MultipartError::limit(Limit::FieldNameSize, max as u64));
            }
        }
        Ok(())
    }

    pub fn check_header_pairs(&self, pairs: usize) -> MultipartResult<()> {
        match self.limits.header_pairs {
            Some(max) if pairs > max => Err(MultipartError::limit(Limit::HeaderPairs, max as u64)),
            _ => Ok(()),
        }
    }

    /// Count one more file part.
    pub fn admit_file(&mut self) -> MultipartResult<()> {
        self.admit_part()?;
        self.files += 1;
        match self.limits.files {
            Some(max) if self.files > max => Err(MultipartError::limit(Limit::Files, max as u64)),
            _ => Ok(()),
        }
    }

    /// Count one more non-file field carrying `value_len` bytes.
    pub fn admit_field(&mut self, value_len: u64) -> MultipartResult<()> {
        self.admit_part()?;
        self.fields += 1;
        if let Some(max) = self.limits.fields {
            if self.fields > max {
                return Err(MultipartError::limit(Limit::Fields, max as u64));
            }
        }
        self.check_field_size(value_len)
    }

    pub fn check_field_size(&self, value_len: u64) -> MultipartResult<()> {
        match self.limits.field_size {
            Some(max) if value_len > max => Err(MultipartError::limit(Limit::FieldSize, max)),
            _ => Ok(()),
        }
    }

    fn admit_part(&mut self) -> MultipartResult<()> {
        self.parts += 1;
        match self.limits.parts {
            Some(max) if self.parts > max => Err(MultipartError::limit(Limit::Parts, max as u64)),
            _ => Ok(()),
        }
    }
}

/// Base name of a client supplied file name, unless paths are preserved.
pub(crate) fn client_file_name(raw: &str, preserve_path: bool) -> String {
    if preserve_path {
        return raw.to_string();
    }
    raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(raw).to_string()
}
