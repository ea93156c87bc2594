use tracing::warn;

use crate::{
    DiskStorage, MultipartError, MultipartOptions, MultipartPart, MultipartResult, UploadedFile,
};

/// Turns accepted parts into [`UploadedFile`]s for one operation.
///
/// Owns the operation's storage, so a failure can take back every file the
/// operation wrote before it fails.
pub(crate) struct Assembler {
    storage: Option<DiskStorage>,
}

impl Assembler {
    pub fn new(options: &MultipartOptions) -> Self {
        let storage = options.dest.as_ref().map(|dest| {
            let mut storage = DiskStorage::new(dest);
            if let Some(bytes) = options.high_water_mark {
                storage = storage.with_buffer_capacity(bytes);
            }
            if let Some(names) = &options.name_generator {
                storage = storage.with_name_generator(names.clone());
            }
            storage
        });
        Self { storage }
    }

    /// Persist a part, or buffer it when there is nowhere to write.
    pub async fn settle(&mut self, part: MultipartPart) -> MultipartResult<UploadedFile> {
        match self.storage.as_mut() {
            Some(storage) => storage.persist_one(part).await.map(UploadedFile::Disk),
            None => part.into_memory().await.map(UploadedFile::Memory),
        }
    }

    /// Persist parts that were already buffered, in order.
    pub async fn settle_buffered(&mut self, parts: Vec<MultipartPart>) -> MultipartResult<Vec<UploadedFile>> {
        match self.storage.as_mut() {
            Some(storage) => Ok(storage
                .persist_many(parts)
                .await?
                .into_iter()
                .map(UploadedFile::Disk)
                .collect()),
            None => Ok(parts.into_iter().map(UploadedFile::Memory).collect()),
        }
    }

    /// Drop partial results and report `err`.
    pub async fn fail<T>(&mut self, err: MultipartError) -> MultipartResult<T> {
        warn!(error = %err, kind = ?err.kind(), "Multipart operation failed");
        if let Some(storage) = self.storage.as_mut() {
            storage.discard().await;
        }
        Err(err)
    }
}
