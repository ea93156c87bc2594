use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use dog_multipart::{
    FileFieldMap, MulterPartSource, MultipartWrapper, UploadField, UploadOperation, UploadOutcome,
    UploadedFile,
};
use serde::Serialize;

use crate::filter::{bind, RequestFileFilter, RequestHead};
use crate::layer::is_multipart;
use crate::UploadError;

/// Outcome left in request extensions by [`UploadLayer`](crate::UploadLayer).
///
/// Uploaded files own their bodies, so the outcome can be taken out once.
#[derive(Debug, Clone)]
pub struct UploadedFiles {
    outcome: Arc<Mutex<Option<UploadOutcome>>>,
}

impl UploadedFiles {
    pub fn new(outcome: UploadOutcome) -> Self {
        Self {
            outcome: Arc::new(Mutex::new(Some(outcome))),
        }
    }

    /// Take the outcome; `None` once somebody else took it.
    pub fn take(&self) -> Option<UploadOutcome> {
        match self.outcome.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn take_file(&self) -> Option<UploadedFile> {
        match self.take()? {
            UploadOutcome::File(file) => file,
            _ => None,
        }
    }

    pub fn take_files(&self) -> Vec<UploadedFile> {
        self.take().map(UploadOutcome::into_files).unwrap_or_default()
    }

    pub fn take_fields(&self) -> Option<FileFieldMap> {
        match self.take()? {
            UploadOutcome::FileFields(map) => map,
            _ => None,
        }
    }
}

/// JSON-friendly description of an uploaded file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub field_name: String,
    pub original_name: String,
    pub content_type: String,
    pub stored_name: Option<String>,
    pub size_bytes: Option<u64>,
}

impl From<&UploadedFile> for FileSummary {
    fn from(file: &UploadedFile) -> Self {
        Self {
            field_name: file.field_name().to_string(),
            original_name: file.original_name().to_string(),
            content_type: file.content_type().to_string(),
            stored_name: file.stored_name().map(str::to_string),
            size_bytes: file.size_bytes(),
        }
    }
}

/// Handler-side access to a multipart body.
///
/// Pulls the [`MultipartWrapper`] from the router state and leaves running an
/// operation to the handler.
///
/// ```rust,no_run
/// use axum::{routing::post, Router};
/// use dog_multipart::{MultipartOptions, MultipartWrapper};
/// use dog_multipart_axum::{MultipartUpload, UploadError};
///
/// async fn upload(upload: MultipartUpload) -> Result<String, UploadError> {
///     let files = upload.files("files", Some(4)).await?;
///     Ok(format!("{} files", files.map(|f| f.len()).unwrap_or(0)))
/// }
///
/// let app: Router = Router::new()
///     .route("/upload", post(upload))
///     .with_state(MultipartWrapper::new(MultipartOptions::new().with_dest("uploads")));
/// ```
pub struct MultipartUpload {
    wrapper: MultipartWrapper,
    source: MulterPartSource,
    head: Arc<RequestHead>,
}

impl<S> FromRequest<S> for MultipartUpload
where
    MultipartWrapper: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = UploadError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_multipart(&content_type) {
            return Err(UploadError::not_multipart(&content_type));
        }

        let wrapper = MultipartWrapper::from_ref(state);
        let (parts, body) = req.into_parts();
        let source = MulterPartSource::from_content_type(&content_type, body.into_data_stream(), wrapper.options())?;

        Ok(Self {
            wrapper,
            source,
            head: Arc::new(RequestHead::from_parts(&parts)),
        })
    }
}

impl MultipartUpload {
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn wrapper(&self) -> &MultipartWrapper {
        &self.wrapper
    }

    /// Install a filter that also sees this request.
    ///
    /// Source limits were fixed when the body was extracted; filters,
    /// destination and naming still apply.
    pub fn with_request_filter<F: RequestFileFilter + 'static>(mut self, filter: F) -> Self {
        let local = bind(Arc::clone(&self.head), Arc::new(filter));
        self.wrapper = self.wrapper.with_local(&local);
        self
    }

    pub fn into_source(self) -> MulterPartSource {
        self.source
    }

    pub async fn run(self, operation: &UploadOperation) -> Result<UploadOutcome, UploadError> {
        Ok(self.wrapper.run(operation, self.source).await?)
    }

    pub async fn file(self, field: &str) -> Result<Option<UploadedFile>, UploadError> {
        Ok(self.wrapper.file(field, self.source).await?)
    }

    pub async fn files(self, field: &str, max_count: Option<usize>) -> Result<Option<Vec<UploadedFile>>, UploadError> {
        Ok(self.wrapper.files(field, max_count, self.source).await?)
    }

    pub async fn any(self) -> Result<Vec<UploadedFile>, UploadError> {
        Ok(self.wrapper.any(self.source).await?)
    }

    pub async fn file_fields(self, fields: &[UploadField]) -> Result<Option<FileFieldMap>, UploadError> {
        Ok(self.wrapper.file_fields(fields, self.source).await?)
    }
}
