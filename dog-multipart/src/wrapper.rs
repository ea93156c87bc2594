use tracing::{debug, instrument};

use crate::assembler::Assembler;
use crate::{
    FileFieldMap, FilterStage, MultipartError, MultipartOptions, MultipartPart, MultipartResult,
    PartSource, Router, UploadField, UploadedFile,
};

/// Which files an operation collects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOperation {
    /// First accepted file of one field
    File(String),
    /// Every accepted file of one field; a positive `max_count` caps the
    /// number of file parts the source produces at all
    Files {
        field: String,
        max_count: Option<usize>,
    },
    /// Every accepted file, whatever its field
    Any,
    /// Files of the declared fields, grouped per field
    FileFields(Vec<UploadField>),
}

impl UploadOperation {
    pub fn file<S: Into<String>>(field: S) -> Self {
        Self::File(field.into())
    }

    pub fn files<S: Into<String>>(field: S, max_count: Option<usize>) -> Self {
        Self::Files {
            field: field.into(),
            max_count,
        }
    }

    pub fn any() -> Self {
        Self::Any
    }

    pub fn file_fields<I: IntoIterator<Item = UploadField>>(fields: I) -> Self {
        Self::FileFields(fields.into_iter().collect())
    }
}

/// Result of an [`UploadOperation`]
#[derive(Debug)]
pub enum UploadOutcome {
    File(Option<UploadedFile>),
    Files(Option<Vec<UploadedFile>>),
    Any(Vec<UploadedFile>),
    FileFields(Option<FileFieldMap>),
}

impl UploadOutcome {
    /// Every file of the outcome, in arrival order per field.
    pub fn into_files(self) -> Vec<UploadedFile> {
        match self {
            Self::File(file) => file.into_iter().collect(),
            Self::Files(files) => files.unwrap_or_default(),
            Self::Any(files) => files,
            Self::FileFields(map) => map
                .into_iter()
                .flat_map(|map| map.into_iter().flat_map(|(_, files)| files))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::File(file) => file.is_none(),
            Self::Files(files) => files.as_ref().map_or(true, Vec::is_empty),
            Self::Any(files) => files.is_empty(),
            Self::FileFields(map) => map.as_ref().map_or(true, FileFieldMap::is_empty),
        }
    }
}

/// Entry point for pulling files out of a multipart body.
///
/// ```rust,no_run
/// use dog_multipart::{MemoryPartSource, MultipartOptions, MultipartWrapper};
///
/// # async fn demo() -> dog_multipart::MultipartResult<()> {
/// let wrapper = MultipartWrapper::new(MultipartOptions::new().with_dest("uploads"));
/// let source = MemoryPartSource::new().file("avatar", "me.png", "image/png", "...");
///
/// if let Some(file) = wrapper.file("avatar", source).await? {
///     println!("stored as {:?}", file.stored_name());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MultipartWrapper {
    options: MultipartOptions,
}

impl MultipartWrapper {
    pub fn new(options: MultipartOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MultipartOptions {
        &self.options
    }

    /// Wrapper for one use site; `local` values override the shared ones.
    pub fn with_local(&self, local: &MultipartOptions) -> Self {
        Self::new(self.options.merge(local))
    }

    pub async fn run<S: PartSource>(&self, operation: &UploadOperation, source: S) -> MultipartResult<UploadOutcome> {
        match operation {
            UploadOperation::File(field) => self.file(field, source).await.map(UploadOutcome::File),
            UploadOperation::Files { field, max_count } => self
                .files(field, *max_count, source)
                .await
                .map(UploadOutcome::Files),
            UploadOperation::Any => self.any(source).await.map(UploadOutcome::Any),
            UploadOperation::FileFields(fields) => self
                .file_fields(fields, source)
                .await
                .map(UploadOutcome::FileFields),
        }
    }

    /// First accepted file of `field_name`; later parts are drained.
    ///
    /// With a materialized source a field that was never sent at all fails
    /// with [`MultipartError::UnexpectedField`], while a field whose files
    /// were all filtered out yields `None`.
    #[instrument(skip_all, fields(field = %field_name, dest = ?self.options.dest))]
    pub async fn file<S: PartSource>(&self, field_name: &str, source: S) -> MultipartResult<Option<UploadedFile>> {
        if let Some(declared) = source.declared_fields() {
            if !declared.contains(field_name) {
                return Err(MultipartError::unexpected_field(field_name));
            }
        }

        let mut router = Router::new(source, self.stage());
        let mut assembler = Assembler::new(&self.options);
        let mut found = None;

        loop {
            let wanted = found.is_none();
            match router
                .next_accepted(|part| Ok(wanted && part.field_name == field_name))
                .await
            {
                Ok(Some(part)) => match assembler.settle(part).await {
                    Ok(file) => found = Some(file),
                    Err(e) => return assembler.fail(e).await,
                },
                Ok(None) => break,
                Err(e) => return assembler.fail(e).await,
            }
        }

        debug!(found = found.is_some(), "File operation finished");
        Ok(found)
    }

    /// Every accepted file of `field_name`, in arrival order.
    ///
    /// A positive `max_count` becomes a hard cap on file parts for the whole
    /// request: the source fails once it would produce one more.
    #[instrument(skip_all, fields(field = %field_name, max_count = ?max_count, dest = ?self.options.dest))]
    pub async fn files<S: PartSource>(
        &self,
        field_name: &str,
        max_count: Option<usize>,
        mut source: S,
    ) -> MultipartResult<Option<Vec<UploadedFile>>> {
        if let Some(max) = max_count.filter(|max| *max > 0) {
            source.cap_files(max);
        }
        let files = self.collect(source, |part| part.field_name == field_name).await?;
        debug!(count = files.len(), "Files operation finished");
        Ok(if files.is_empty() { None } else { Some(files) })
    }

    /// Every accepted file, whatever its field, in arrival order.
    #[instrument(skip_all, fields(dest = ?self.options.dest))]
    pub async fn any<S: PartSource>(&self, source: S) -> MultipartResult<Vec<UploadedFile>> {
        let files = self.collect(source, |_| true).await?;
        debug!(count = files.len(), "Any operation finished");
        Ok(files)
    }

    /// Accepted files grouped by the declared `fields`.
    ///
    /// A part for an undeclared field fails the operation, a field declared
    /// with `max_count` 0 is skipped, and a field that was sent more files
    /// than its `max_count` fails the operation. Nothing is written before
    /// the whole body was routed.
    ///
    /// Accepted files are held in memory until then, even with a destination
    /// configured. Set [`Limits::with_file_size`](crate::Limits::with_file_size)
    /// (and `files` or `max_count`) to bound what one request can buffer.
    #[instrument(skip_all, fields(fields = fields.len(), dest = ?self.options.dest))]
    pub async fn file_fields<S: PartSource>(
        &self,
        fields: &[UploadField],
        source: S,
    ) -> MultipartResult<Option<FileFieldMap>> {
        let mut router = Router::new(source, self.stage());
        let mut assembler = Assembler::new(&self.options);
        let mut groups: Vec<(String, Vec<MultipartPart>)> = Vec::new();
        let mut kept: Vec<(String, usize)> = Vec::new();

        loop {
            let next = router
                .next_accepted(|part| admit_field_part(fields, &kept, part))
                .await;
            match next {
                Ok(Some(part)) => {
                    let part = match part.into_memory().await {
                        Ok(part) => part,
                        Err(e) => return assembler.fail(e).await,
                    };
                    match kept.iter_mut().find(|(name, _)| *name == part.field_name) {
                        Some((_, count)) => *count += 1,
                        None => kept.push((part.field_name.clone(), 1)),
                    }
                    match groups.iter_mut().find(|(name, _)| *name == part.field_name) {
                        Some((_, parts)) => parts.push(part),
                        None => groups.push((part.field_name.clone(), vec![part])),
                    }
                }
                Ok(None) => break,
                Err(e) => return assembler.fail(e).await,
            }
        }

        let mut map = FileFieldMap::default();
        for (name, parts) in groups {
            match assembler.settle_buffered(parts).await {
                Ok(files) => map.insert(name, files),
                Err(e) => return assembler.fail(e).await,
            }
        }

        debug!(populated = map.len(), "File fields operation finished");
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn collect<S, F>(&self, source: S, wanted: F) -> MultipartResult<Vec<UploadedFile>>
    where
        S: PartSource,
        F: Fn(&MultipartPart) -> bool,
    {
        let mut router = Router::new(source, self.stage());
        let mut assembler = Assembler::new(&self.options);
        let mut files = Vec::new();

        loop {
            match router.next_accepted(|part| Ok(wanted(part))).await {
                Ok(Some(part)) => match assembler.settle(part).await {
                    Ok(file) => files.push(file),
                    Err(e) => return assembler.fail(e).await,
                },
                Ok(None) => return Ok(files),
                Err(e) => return assembler.fail(e).await,
            }
        }
    }

    fn stage(&self) -> FilterStage {
        FilterStage::from_options(&self.options)
    }
}

/// Gate for [`MultipartWrapper::file_fields`].
fn admit_field_part(
    fields: &[UploadField],
    kept: &[(String, usize)],
    part: &MultipartPart,
) -> MultipartResult<bool> {
    let declared = fields
        .iter()
        .find(|declared| declared.name == part.field_name)
        .ok_or_else(|| MultipartError::unexpected_field(&part.field_name))?;

    let max = match declared.max_count {
        None => return Ok(true),
        Some(0) => return Ok(false),
        Some(max) => max,
    };

    let kept = kept
        .iter()
        .find(|(name, _)| *name == declared.name)
        .map_or(0, |(_, count)| *count);
    let received = part.fields.file_count(&declared.name).max(kept + 1);
    if received > max {
        return Err(MultipartError::field_count_exceeded(&declared.name, max, received));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryPartSource, MulterPartSource};
    use bytes::Bytes;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn operation_futures_are_send() {
        let wrapper = MultipartWrapper::default();
        let declared = [UploadField::new("avatar", 1), UploadField::unlimited("gallery")];
        let live = || {
            let body = futures_util::stream::empty::<Result<Bytes, std::io::Error>>();
            MulterPartSource::new(body, "boundary", wrapper.options())
        };

        assert_send(&wrapper.file("avatar", MemoryPartSource::new()));
        assert_send(&wrapper.files("gallery", Some(2), MemoryPartSource::new()));
        assert_send(&wrapper.any(MemoryPartSource::new()));
        assert_send(&wrapper.file_fields(&declared, MemoryPartSource::new()));
        assert_send(&wrapper.file_fields(&declared, live()));
        assert_send(&wrapper.run(&UploadOperation::FileFields(declared.to_vec()), live()));
    }

    #[tokio::test]
    async fn materialized_file_distinguishes_missing_from_filtered() {
        let wrapper = MultipartWrapper::new(MultipartOptions::new().allow_mime_type("image/png"));
        let source = || {
            MemoryPartSource::new()
                .file("avatar", "me.gif", "image/gif", "GIF")
                .materialize()
        };

        let filtered = wrapper.file("avatar", source()).await.unwrap();
        assert!(filtered.is_none());

        let err = wrapper.file("cover", source()).await.unwrap_err();
        assert!(matches!(err, MultipartError::UnexpectedField { field } if field == "cover"));
    }

    #[tokio::test]
    async fn file_keeps_the_first_match_and_drains_the_rest() {
        let wrapper = MultipartWrapper::default();
        let source = MemoryPartSource::new()
            .file("doc", "first.txt", "text/plain", "1")
            .file("doc", "second.txt", "text/plain", "2");

        let file = wrapper.file("doc", source).await.unwrap().unwrap();
        assert_eq!(file.original_name(), "first.txt");
    }

    #[tokio::test]
    async fn zero_max_count_ignores_the_field() {
        let wrapper = MultipartWrapper::default();
        let source = MemoryPartSource::new()
            .file("thumb", "t.png", "image/png", "t")
            .file("photo", "p.png", "image/png", "p");

        let map = wrapper
            .file_fields(&[UploadField::new("thumb", 0), UploadField::new("photo", 1)], source)
            .await
            .unwrap()
            .unwrap();

        assert!(!map.contains("thumb"));
        assert_eq!(map.get("photo").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_fields_without_survivors_is_absent() {
        let wrapper = MultipartWrapper::new(MultipartOptions::new().allow_mime_type("image/png"));
        let source = MemoryPartSource::new().file("photo", "p.gif", "image/gif", "p");

        let map = wrapper
            .file_fields(&[UploadField::unlimited("photo")], source)
            .await
            .unwrap();
        assert!(map.is_none());
    }

    #[tokio::test]
    async fn run_dispatches_on_the_operation() {
        let wrapper = MultipartWrapper::default();
        let source = MemoryPartSource::new()
            .file("a", "1.txt", "text/plain", "1")
            .file("b", "2.txt", "text/plain", "2");

        let outcome = wrapper.run(&UploadOperation::any(), source).await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Any(ref files) if files.len() == 2));
        let names: Vec<_> = outcome
            .into_files()
            .iter()
            .map(|f| f.original_name().to_string())
            .collect();
        assert_eq!(names, vec!["1.txt", "2.txt"]);
    }
}
