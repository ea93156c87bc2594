use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::filter::FileFilter;
use crate::storage::NameGenerator;

/// Size and count limits enforced by part sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Limits {
    /// Max field name size in bytes
    pub field_name_size: Option<usize>,
    /// Max value size of a non-file field in bytes
    pub field_size: Option<u64>,
    /// Max number of non-file fields
    pub fields: Option<usize>,
    /// Max size of a single file in bytes
    pub file_size: Option<u64>,
    /// Max number of file parts
    pub files: Option<usize>,
    /// Max number of parts (files + fields)
    pub parts: Option<usize>,
    /// Max number of header pairs per part
    pub header_pairs: Option<usize>,
}

impl Limits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_name_size(mut self, bytes: usize) -> Self {
        self.field_name_size = Some(bytes);
        self
    }

    pub fn with_field_size(mut self, bytes: u64) -> Self {
        self.field_size = Some(bytes);
        self
    }

    pub fn with_fields(mut self, max: usize) -> Self {
        self.fields = Some(max);
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = Some(bytes);
        self
    }

    pub fn with_files(mut self, max: usize) -> Self {
        self.files = Some(max);
        self
    }

    pub fn with_parts(mut self, max: usize) -> Self {
        self.parts = Some(max);
        self
    }

    pub fn with_header_pairs(mut self, max: usize) -> Self {
        self.header_pairs = Some(max);
        self
    }

    /// Layer `other` over `self`; values set in `other` win.
    pub fn merge(&self, other: &Limits) -> Limits {
        Limits {
            field_name_size: other.field_name_size.or(self.field_name_size),
            field_size: other.field_size.or(self.field_size),
            fields: other.fields.or(self.fields),
            file_size: other.file_size.or(self.file_size),
            files: other.files.or(self.files),
            parts: other.parts.or(self.parts),
            header_pairs: other.header_pairs.or(self.header_pairs),
        }
    }
}

/// Expected file field for [`MultipartWrapper::file_fields`](crate::MultipartWrapper::file_fields)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadField {
    pub name: String,
    /// `None` accepts any number of files, `Some(0)` ignores the field.
    pub max_count: Option<usize>,
}

impl UploadField {
    pub fn new<S: Into<String>>(name: S, max_count: usize) -> Self {
        Self {
            name: name.into(),
            max_count: Some(max_count),
        }
    }

    pub fn unlimited<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            max_count: None,
        }
    }
}

/// Configuration shared by every operation of a [`MultipartWrapper`](crate::MultipartWrapper)
#[derive(Clone, Default)]
pub struct MultipartOptions {
    /// Where accepted files are written. `None` keeps them in memory.
    pub dest: Option<PathBuf>,
    pub limits: Limits,
    /// Keep the client path of a file name instead of its base name
    pub preserve_path: bool,
    /// Write buffer capacity used when persisting files
    pub high_water_mark: Option<usize>,
    /// Content types accepted for files (empty = all allowed)
    pub allowed_mime_types: Vec<String>,
    pub file_filter: Option<Arc<dyn FileFilter>>,
    /// Random id source for stored file names (UUID v4 when unset)
    pub name_generator: Option<Arc<dyn NameGenerator>>,
}

impl std::fmt::Debug for MultipartOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartOptions")
            .field("dest", &self.dest)
            .field("limits", &self.limits)
            .field("preserve_path", &self.preserve_path)
            .field("high_water_mark", &self.high_water_mark)
            .field("allowed_mime_types", &self.allowed_mime_types)
            .field("file_filter", &self.file_filter.is_some())
            .field("name_generator", &self.name_generator.is_some())
            .finish()
    }
}

impl MultipartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist accepted files under `dest`
    pub fn with_dest<P: AsRef<Path>>(mut self, dest: P) -> Self {
        self.dest = Some(dest.as_ref().to_path_buf());
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn preserve_path(mut self, preserve: bool) -> Self {
        self.preserve_path = preserve;
        self
    }

    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = Some(bytes);
        self
    }

    /// Add a content type accepted for files
    pub fn allow_mime_type<S: Into<String>>(mut self, mime: S) -> Self {
        self.allowed_mime_types.push(mime.into());
        self
    }

    pub fn with_file_filter<F: FileFilter + 'static>(mut self, filter: F) -> Self {
        self.file_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_name_generator<G: NameGenerator + 'static>(mut self, names: G) -> Self {
        self.name_generator = Some(Arc::new(names));
        self
    }

    /// Layer per-use options over module-wide ones; values set in `local` win.
    pub fn merge(&self, local: &MultipartOptions) -> MultipartOptions {
        MultipartOptions {
            dest: local.dest.clone().or_else(|| self.dest.clone()),
            limits: self.limits.merge(&local.limits),
            preserve_path: local.preserve_path || self.preserve_path,
            high_water_mark: local.high_water_mark.or(self.high_water_mark),
            allowed_mime_types: if local.allowed_mime_types.is_empty() {
                self.allowed_mime_types.clone()
            } else {
                local.allowed_mime_types.clone()
            },
            file_filter: local.file_filter.clone().or_else(|| self.file_filter.clone()),
            name_generator: local
                .name_generator
                .clone()
                .or_else(|| self.name_generator.clone()),
        }
    }

    /// Whether `content_type` passes the allow-list.
    pub fn is_mime_allowed(&self, content_type: &str) -> bool {
        crate::filter::mime_allowed(&self.allowed_mime_types, content_type)
    }
}
