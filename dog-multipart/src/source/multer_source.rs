use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::debug;

use super::{client_file_name, PartSource, SourceLimits};
use crate::{
    BoxError, FieldEntry, FieldsSnapshot, MultipartOptions, MultipartPart, MultipartResult,
    PartBody,
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Streaming source over a raw `multipart/form-data` body, parsed with `multer`.
///
/// Text fields are consumed on the way and recorded in the snapshot; only
/// file parts are handed out.
pub struct MulterPartSource {
    multipart: multer::Multipart<'static>,
    limits: SourceLimits,
    preserve_path: bool,
    fields: FieldsSnapshot,
}

impl MulterPartSource {
    pub fn new<S, O, E, B>(stream: S, boundary: B, options: &MultipartOptions) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
        B: Into<String>,
    {
        Self {
            multipart: multer::Multipart::new(stream, boundary),
            limits: SourceLimits::new(options.limits.clone()),
            preserve_path: options.preserve_path,
            fields: FieldsSnapshot::new(),
        }
    }

    /// Build a source from a `Content-Type` header value.
    pub fn from_content_type<S, O, E>(
        content_type: &str,
        stream: S,
        options: &MultipartOptions,
    ) -> MultipartResult<Self>
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        let boundary = multer::parse_boundary(content_type)?;
        Ok(Self::new(stream, boundary, options))
    }

    async fn read_text(&mut self, name: &str, mut field: multer::Field<'static>) -> MultipartResult<String> {
        let mut value = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            value.extend_from_slice(&chunk);
            self.limits.check_field_size(value.len() as u64)?;
        }
        self.limits.admit_field(value.len() as u64)?;
        debug!(field = %name, bytes = value.len(), "Recorded text field");
        Ok(String::from_utf8_lossy(&value).into_owned())
    }
}

#[async_trait]
impl PartSource for MulterPartSource {
    async fn next_part(&mut self) -> MultipartResult<Option<MultipartPart>> {
        while let Some(field) = self.multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            self.limits.check_name(&name)?;
            self.limits.check_header_pairs(field.headers().len())?;

            let Some(raw_file_name) = field.file_name().map(str::to_string) else {
                let value = self.read_text(&name, field).await?;
                self.fields.record(&name, FieldEntry::Text { value });
                continue;
            };

            self.limits.admit_file()?;
            let content_type = field
                .content_type()
                .map(|mime| mime.to_string())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            let file_name = client_file_name(&raw_file_name, self.preserve_path);

            let stream = field.map(|chunk| {
                chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            });
            let body = PartBody::new(Box::pin(stream)).with_size_limit(self.limits.limits().file_size);
            let part = MultipartPart::new(name.clone(), file_name, content_type, body);

            self.fields.record(&name, FieldEntry::File(part.headers()));
            return Ok(Some(part.with_fields(self.fields.clone())));
        }
        Ok(None)
    }

    fn cap_files(&mut self, max: usize) {
        self.limits.cap_files(max);
    }
}

impl std::fmt::Debug for MulterPartSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulterPartSource")
            .field("limits", &self.limits)
            .field("preserve_path", &self.preserve_path)
            .field("fields", &self.fields.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Limit, Limits, MultipartError};

    const BOUNDARY: &str = "X-BOUNDARY";

    fn body(parts: &[(&str, Option<&str>, &str)]) -> Vec<Result<Bytes, std::io::Error>> {
        let mut raw = String::new();
        for (name, file_name, value) in parts {
            raw.push_str(&format!("--{BOUNDARY}\r\n"));
            match file_name {
                Some(file_name) => {
                    raw.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
                    ));
                    raw.push_str("Content-Type: image/png\r\n\r\n");
                }
                None => raw.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")),
            }
            raw.push_str(value);
            raw.push_str("\r\n");
        }
        raw.push_str(&format!("--{BOUNDARY}--\r\n"));
        vec![Ok(Bytes::from(raw))]
    }

    fn source(parts: &[(&str, Option<&str>, &str)], options: &MultipartOptions) -> MulterPartSource {
        MulterPartSource::new(futures_util::stream::iter(body(parts)), BOUNDARY, options)
    }

    #[tokio::test]
    async fn text_fields_are_recorded_not_yielded() {
        let mut source = source(
            &[("title", None, "holiday"), ("photo", Some("beach.png"), "PNGDATA")],
            &MultipartOptions::new(),
        );

        let mut part = source.next_part().await.unwrap().unwrap();
        assert_eq!(part.field_name, "photo");
        assert_eq!(part.file_name, "beach.png");
        assert_eq!(part.content_type, "image/png");
        assert_eq!(part.fields.text("title"), Some("holiday"));

        let bytes = part.body.read_to_bytes("photo").await.unwrap();
        assert_eq!(&bytes[..], b"PNGDATA");
        drop(part);

        assert!(source.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn client_paths_are_stripped() {
        let mut source = source(&[("doc", Some("../../etc/passwd"), "x")], &MultipartOptions::new());
        let part = source.next_part().await.unwrap().unwrap();
        assert_eq!(part.file_name, "passwd");
    }

    #[tokio::test]
    async fn file_size_limit_trips_on_read() {
        let options = MultipartOptions::new().with_limits(Limits::new().with_file_size(3));
        let mut source = source(&[("doc", Some("a.bin"), "abcdef")], &options);

        let mut part = source.next_part().await.unwrap().unwrap();
        let err = part.body.read_to_bytes("doc").await.unwrap_err();
        assert!(matches!(err, MultipartError::LimitExceeded { limit: Limit::FileSize, max: 3 }));
    }

    #[tokio::test]
    async fn missing_boundary_is_invalid_multipart() {
        let err = MulterPartSource::from_content_type(
            "application/json",
            futures_util::stream::iter(body(&[])),
            &MultipartOptions::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MultipartError::InvalidMultipart { .. }));
    }
}
