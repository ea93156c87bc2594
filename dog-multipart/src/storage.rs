//! # Disk persistence
//!
//! [`DiskStorage`] streams accepted parts into a destination directory.
//! Stored names are a fresh random id plus the extension of the client
//! file name, so two uploads never collide and the client never controls
//! a path on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{FieldsSnapshot, MultipartError, MultipartPart, MultipartResult};

const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Produces the random part of stored file names
pub trait NameGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// UUID v4 in its dash-free form
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidNames;

impl NameGenerator for UuidNames {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// A part written to disk
#[derive(Debug, Clone, Serialize)]
pub struct PersistedFile {
    pub field_name: String,
    pub original_name: String,
    pub stored_name: String,
    pub content_type: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(skip)]
    pub fields: FieldsSnapshot,
}

/// Writes parts under one destination directory.
///
/// The directory is created on the first write and never again for the
/// lifetime of the storage, even if it disappears in between.
pub struct DiskStorage {
    dest: PathBuf,
    names: Arc<dyn NameGenerator>,
    buffer_capacity: usize,
    dir_ready: bool,
    written: Vec<PathBuf>,
}

impl DiskStorage {
    pub fn new<P: AsRef<Path>>(dest: P) -> Self {
        Self {
            dest: dest.as_ref().to_path_buf(),
            names: Arc::new(UuidNames),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            dir_ready: false,
            written: Vec::new(),
        }
    }

    pub fn with_name_generator(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = names;
        self
    }

    /// Write buffer size; `0` falls back to the default.
    pub fn with_buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = if bytes == 0 { DEFAULT_BUFFER_CAPACITY } else { bytes };
        self
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Files written by this storage so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Stored name for a client file name: random id plus its extension.
    pub fn stored_name(&self, original_name: &str) -> String {
        let id = self.names.generate();
        match Path::new(original_name).extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{id}.{ext}"),
            None => id,
        }
    }

    async fn ensure_dir(&mut self) -> MultipartResult<()> {
        if self.dir_ready {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dest)
            .await
            .map_err(|source| MultipartError::DirectoryCreationFailed {
                path: self.dest.clone(),
                source,
            })?;
        self.dir_ready = true;
        Ok(())
    }

    /// Stream one part to disk.
    ///
    /// On failure the part's stream is destroyed and any partially written
    /// file is removed.
    #[instrument(skip(self, part), fields(field = %part.field_name, file = %part.file_name))]
    pub async fn persist_one(&mut self, mut part: MultipartPart) -> MultipartResult<PersistedFile> {
        if let Err(e) = self.ensure_dir().await {
            part.body.destroy();
            return Err(e);
        }

        let stored_name = self.stored_name(&part.file_name);
        let path = self.dest.join(&stored_name);

        let file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(source) => {
                part.body.destroy();
                return Err(MultipartError::WriteFailed { path, source });
            }
        };

        let mut stream = match part.body.take_stream(&part.field_name) {
            Ok(stream) => stream,
            Err(e) => {
                remove_quietly(&path).await;
                return Err(e);
            }
        };

        let mut writer = BufWriter::with_capacity(self.buffer_capacity, file);
        let mut size_bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(stream);
                    part.body.destroy();
                    drop(writer);
                    remove_quietly(&path).await;
                    return Err(MultipartError::from_io(&part.field_name, e));
                }
            };
            if let Err(source) = writer.write_all(&chunk).await {
                drop(stream);
                part.body.destroy();
                drop(writer);
                remove_quietly(&path).await;
                return Err(MultipartError::WriteFailed { path, source });
            }
            size_bytes += chunk.len() as u64;
        }
        drop(stream);

        if let Err(source) = writer.flush().await {
            part.body.destroy();
            drop(writer);
            remove_quietly(&path).await;
            return Err(MultipartError::WriteFailed { path, source });
        }
        part.body.mark_consumed();
        self.written.push(path.clone());

        debug!(path = %path.display(), size_bytes, "Persisted part");

        Ok(PersistedFile {
            field_name: part.field_name,
            original_name: part.file_name,
            stored_name,
            content_type: part.content_type,
            path,
            size_bytes,
            fields: part.fields,
        })
    }

    /// Persist parts in order; the first failure aborts the rest.
    pub async fn persist_many<I>(&mut self, parts: I) -> MultipartResult<Vec<PersistedFile>>
    where
        I: IntoIterator<Item = MultipartPart>,
    {
        let mut persisted = Vec::new();
        let mut parts = parts.into_iter();
        while let Some(part) = parts.next() {
            match self.persist_one(part).await {
                Ok(file) => persisted.push(file),
                Err(e) => {
                    for mut rest in parts {
                        rest.body.destroy();
                    }
                    return Err(e);
                }
            }
        }
        Ok(persisted)
    }

    /// Remove every file this storage wrote.
    pub async fn discard(&mut self) {
        for path in self.written.drain(..) {
            remove_quietly(&path).await;
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

impl std::fmt::Debug for DiskStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStorage")
            .field("dest", &self.dest)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("dir_ready", &self.dir_ready)
            .field("written", &self.written.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BodyState, PartBody};
    use bytes::Bytes;

    struct Fixed(&'static str);

    impl NameGenerator for Fixed {
        fn generate(&self) -> String {
            self.0.to_string()
        }
    }

    fn part(file_name: &str, content: &'static [u8]) -> MultipartPart {
        MultipartPart::new("upload", file_name, "image/png", PartBody::from_bytes(Bytes::from_static(content)))
    }

    #[test]
    fn stored_name_keeps_only_the_extension() {
        let storage = DiskStorage::new("unused").with_name_generator(Arc::new(Fixed("abc123")));
        assert_eq!(storage.stored_name("cat.png"), "abc123.png");
        assert_eq!(storage.stored_name("archive.tar.gz"), "abc123.gz");
        assert_eq!(storage.stored_name("README"), "abc123");
    }

    #[tokio::test]
    async fn persist_one_records_bytes_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = DiskStorage::new(dir.path().join("uploads"));

        let part = part("cat.png", b"0123456789");
        let tracker = part.body.tracker();
        let file = storage.persist_one(part).await.unwrap();

        assert_eq!(file.size_bytes, 10);
        assert_eq!(file.original_name, "cat.png");
        assert!(file.stored_name.ends_with(".png"));
        assert_eq!(std::fs::read(&file.path).unwrap(), b"0123456789");
        assert_eq!(tracker.state(), BodyState::Consumed);
    }

    #[tokio::test]
    async fn directory_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("uploads");
        let mut storage = DiskStorage::new(&dest);

        storage.persist_one(part("a.png", b"a")).await.unwrap();
        std::fs::remove_dir_all(&dest).unwrap();

        let err = storage.persist_one(part("b.png", b"b")).await.unwrap_err();
        assert!(matches!(err, MultipartError::WriteFailed { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn unwritable_destination_fails_directory_creation() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let mut storage = DiskStorage::new(blocker.join("uploads"));

        let part = part("a.png", b"a");
        let tracker = part.body.tracker();
        let err = storage.persist_one(part).await.unwrap_err();

        assert!(matches!(err, MultipartError::DirectoryCreationFailed { .. }));
        assert_eq!(tracker.state(), BodyState::Destroyed);
    }

    #[tokio::test]
    async fn stream_failure_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = DiskStorage::new(dir.path()).with_name_generator(Arc::new(Fixed("partial")));

        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"half")),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated")),
        ];
        let body = PartBody::new(Box::pin(futures_util::stream::iter(items)));
        let err = storage
            .persist_one(MultipartPart::new("upload", "x.bin", "application/octet-stream", body))
            .await
            .unwrap_err();

        assert!(matches!(err, MultipartError::StreamError { .. }));
        assert!(!dir.path().join("partial.bin").exists());
        assert!(storage.written().is_empty());
    }

    #[tokio::test]
    async fn discard_removes_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = DiskStorage::new(dir.path());
        let files = storage
            .persist_many(vec![part("a.png", b"a"), part("b.png", b"b")])
            .await
            .unwrap();

        storage.discard().await;

        for file in files {
            assert!(!file.path.exists());
        }
    }
}
