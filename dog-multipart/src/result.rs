use std::path::Path;

use crate::{FieldsSnapshot, MultipartPart, PersistedFile};

/// One accepted file as returned to the caller
#[derive(Debug)]
pub enum UploadedFile {
    /// No destination configured: the part with an unread, in-memory body.
    /// Reading it is up to the caller.
    Memory(MultipartPart),
    /// Written under the destination directory
    Disk(PersistedFile),
}

impl UploadedFile {
    pub fn field_name(&self) -> &str {
        match self {
            Self::Memory(part) => &part.field_name,
            Self::Disk(file) => &file.field_name,
        }
    }

    /// File name as sent by the client
    pub fn original_name(&self) -> &str {
        match self {
            Self::Memory(part) => &part.file_name,
            Self::Disk(file) => &file.original_name,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Self::Memory(part) => &part.content_type,
            Self::Disk(file) => &file.content_type,
        }
    }

    pub fn fields(&self) -> &FieldsSnapshot {
        match self {
            Self::Memory(part) => &part.fields,
            Self::Disk(file) => &file.fields,
        }
    }

    pub fn stored_name(&self) -> Option<&str> {
        self.as_disk().map(|file| file.stored_name.as_str())
    }

    pub fn path(&self) -> Option<&Path> {
        self.as_disk().map(|file| file.path.as_path())
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.as_disk().map(|file| file.size_bytes)
    }

    pub fn as_disk(&self) -> Option<&PersistedFile> {
        match self {
            Self::Disk(file) => Some(file),
            Self::Memory(_) => None,
        }
    }

    pub fn into_part(self) -> Option<MultipartPart> {
        match self {
            Self::Memory(part) => Some(part),
            Self::Disk(_) => None,
        }
    }

    pub fn into_persisted(self) -> Option<PersistedFile> {
        match self {
            Self::Disk(file) => Some(file),
            Self::Memory(_) => None,
        }
    }
}

/// Field name to accepted files, in the order fields first produced a
/// surviving part. Fields without survivors are absent.
#[derive(Debug, Default)]
pub struct FileFieldMap {
    fields: Vec<(String, Vec<UploadedFile>)>,
}

impl FileFieldMap {
    pub fn get(&self, name: &str) -> Option<&[UploadedFile]> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, files)| files.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<UploadedFile>> {
        let index = self.fields.iter().position(|(key, _)| key == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[UploadedFile])> {
        self.fields
            .iter()
            .map(|(key, files)| (key.as_str(), files.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, files: Vec<UploadedFile>) {
        if !files.is_empty() {
            self.fields.push((name, files));
        }
    }
}

impl IntoIterator for FileFieldMap {
    type Item = (String, Vec<UploadedFile>);
    type IntoIter = std::vec::IntoIter<(String, Vec<UploadedFile>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
