use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;

use super::{client_file_name, PartSource, SourceKind, SourceLimits};
use crate::{
    FieldEntry, FieldsSnapshot, MultipartOptions, MultipartPart, MultipartResult, PartBody,
};

enum Entry {
    File(MultipartPart),
    Text { name: String, value: String },
}

/// Parts that already live in memory.
///
/// Used for bodies parsed ahead of time (fields attached to the request
/// body) and for driving the router in tests. By default parts are handed
/// out the way a streaming parser would, with a snapshot that grows as
/// fields are seen; [`MemoryPartSource::materialize`] switches to a source
/// whose every field is declared before the first part is pulled.
pub struct MemoryPartSource {
    pending: VecDeque<Entry>,
    fields: FieldsSnapshot,
    limits: SourceLimits,
    preserve_path: bool,
    kind: SourceKind,
}

impl Default for MemoryPartSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPartSource {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            fields: FieldsSnapshot::new(),
            limits: SourceLimits::default(),
            preserve_path: false,
            kind: SourceKind::Streaming,
        }
    }

    /// Apply limits and file name handling from `options`.
    pub fn with_options(mut self, options: &MultipartOptions) -> Self {
        self.limits = SourceLimits::new(options.limits.clone());
        self.preserve_path = options.preserve_path;
        self
    }

    /// Queue a file part with in-memory content.
    pub fn file<F, N, C, B>(self, field_name: F, file_name: N, content_type: C, content: B) -> Self
    where
        F: Into<String>,
        N: Into<String>,
        C: Into<String>,
        B: Into<Bytes>,
    {
        let body = PartBody::from_bytes(content.into());
        self.part(MultipartPart::new(field_name, file_name, content_type, body))
    }

    /// Queue a pre-built part, e.g. one whose body is a custom stream.
    pub fn part(mut self, mut part: MultipartPart) -> Self {
        part.file_name = client_file_name(&part.file_name, self.preserve_path);
        self.pending.push_back(Entry::File(part));
        self
    }

    /// Queue a non-file field.
    pub fn text<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.pending.push_back(Entry::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Declare every queued field up front.
    pub fn materialize(mut self) -> Self {
        let mut fields = FieldsSnapshot::new();
        for entry in &self.pending {
            match entry {
                Entry::File(part) => fields.record(&part.field_name, FieldEntry::File(part.headers())),
                Entry::Text { name, value } => fields.record(
                    name,
                    FieldEntry::Text {
                        value: value.clone(),
                    },
                ),
            }
        }
        self.fields = fields;
        self.kind = SourceKind::Materialized;
        self
    }

    /// Entries not yet handed out, text fields included.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    fn record(&mut self, name: &str, entry: FieldEntry) {
        if self.kind == SourceKind::Streaming {
            self.fields.record(name, entry);
        }
    }
}

#[async_trait]
impl PartSource for MemoryPartSource {
    async fn next_part(&mut self) -> MultipartResult<Option<MultipartPart>> {
        while let Some(entry) = self.pending.pop_front() {
            match entry {
                Entry::Text { name, value } => {
                    self.limits.check_name(&name)?;
                    self.limits.admit_field(value.len() as u64)?;
                    self.record(&name, FieldEntry::Text { value });
                }
                Entry::File(mut part) => {
                    if let Err(e) = self
                        .limits
                        .check_name(&part.field_name)
                        .and_then(|_| self.limits.admit_file())
                    {
                        part.body.destroy();
                        return Err(e);
                    }
                    self.record(&part.field_name.clone(), FieldEntry::File(part.headers()));
                    part.body.set_size_limit(self.limits.limits().file_size);
                    part.fields = self.fields.clone();
                    return Ok(Some(part));
                }
            }
        }
        Ok(None)
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn declared_fields(&self) -> Option<FieldsSnapshot> {
        match self.kind {
            SourceKind::Materialized => Some(self.fields.clone()),
            SourceKind::Streaming => None,
        }
    }

    fn cap_files(&mut self, max: usize) {
        self.limits.cap_files(max);
    }
}
