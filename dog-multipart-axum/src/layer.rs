use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use dog_multipart::{
    MulterPartSource, MultipartOptions, MultipartWrapper, UploadField, UploadOperation,
};
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use crate::filter::{bind, RequestFileFilter, RequestHead};
use crate::{UploadError, UploadedFiles};

/// Upload interceptor: runs one [`UploadOperation`] over the request body
/// before the inner service sees the request.
///
/// The outcome is available to handlers as `Extension<UploadedFiles>`; the
/// body handed to the inner service is empty. Requests that are not
/// `multipart/form-data` are answered with 406 without reaching the inner
/// service, and so is every failed upload (with its own status).
///
/// ```rust,no_run
/// use axum::{routing::post, Extension, Router};
/// use dog_multipart::{MultipartOptions, UploadField};
/// use dog_multipart_axum::{UploadLayer, UploadedFiles};
///
/// async fn create(Extension(files): Extension<UploadedFiles>) -> String {
///     format!("{} files", files.take().map(|o| o.into_files().len()).unwrap_or(0))
/// }
///
/// let app: Router = Router::new().route(
///     "/profile",
///     post(create).layer(
///         UploadLayer::file_fields([UploadField::new("avatar", 1), UploadField::new("gallery", 8)])
///             .with_options(MultipartOptions::new().with_dest("uploads")),
///     ),
/// );
/// ```
#[derive(Clone)]
pub struct UploadLayer {
    wrapper: MultipartWrapper,
    local: MultipartOptions,
    operation: UploadOperation,
    request_filter: Option<Arc<dyn RequestFileFilter>>,
}

impl UploadLayer {
    pub fn new(operation: UploadOperation) -> Self {
        Self {
            wrapper: MultipartWrapper::default(),
            local: MultipartOptions::default(),
            operation,
            request_filter: None,
        }
    }

    pub fn file<S: Into<String>>(field: S) -> Self {
        Self::new(UploadOperation::file(field))
    }

    pub fn files<S: Into<String>>(field: S, max_count: Option<usize>) -> Self {
        Self::new(UploadOperation::files(field, max_count))
    }

    pub fn any() -> Self {
        Self::new(UploadOperation::any())
    }

    pub fn file_fields<I: IntoIterator<Item = UploadField>>(fields: I) -> Self {
        Self::new(UploadOperation::file_fields(fields))
    }

    /// Shared, application-wide wrapper
    pub fn with_wrapper(mut self, wrapper: MultipartWrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    /// Options for this layer only; they win over the shared wrapper's.
    pub fn with_options(mut self, local: MultipartOptions) -> Self {
        self.local = local;
        self
    }

    /// Filter that also receives the request head.
    pub fn with_request_filter<F: RequestFileFilter + 'static>(mut self, filter: F) -> Self {
        self.request_filter = Some(Arc::new(filter));
        self
    }

    pub fn operation(&self) -> &UploadOperation {
        &self.operation
    }
}

impl<S> Layer<S> for UploadLayer {
    type Service = UploadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UploadService {
            inner,
            wrapper: self.wrapper.with_local(&self.local),
            operation: self.operation.clone(),
            request_filter: self.request_filter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct UploadService<S> {
    inner: S,
    wrapper: MultipartWrapper,
    operation: UploadOperation,
    request_filter: Option<Arc<dyn RequestFileFilter>>,
}

impl<S> Service<Request<Body>> for UploadService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let wrapper = self.wrapper.clone();
        let operation = self.operation.clone();
        let request_filter = self.request_filter.clone();

        Box::pin(async move {
            let content_type = req
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            if !is_multipart(&content_type) {
                debug!("Rejecting non-multipart request with content-type '{}'", content_type);
                return Ok(UploadError::not_multipart(&content_type).into_response());
            }

            let (mut parts, body) = req.into_parts();
            let wrapper = match request_filter {
                Some(filter) => {
                    let head = Arc::new(RequestHead::from_parts(&parts));
                    wrapper.with_local(&bind(head, filter))
                }
                None => wrapper,
            };

            let source = match MulterPartSource::from_content_type(
                &content_type,
                body.into_data_stream(),
                wrapper.options(),
            ) {
                Ok(source) => source,
                Err(e) => return Ok(UploadError::from(e).into_response()),
            };

            match wrapper.run(&operation, source).await {
                Ok(outcome) => {
                    info!("Upload finished for {} {}", parts.method, parts.uri);
                    parts.extensions.insert(UploadedFiles::new(outcome));
                    inner.call(Request::from_parts(parts, Body::empty())).await
                }
                Err(e) => {
                    warn!("Upload failed for {} {}: {}", parts.method, parts.uri, e);
                    Ok(UploadError::from(e).into_response())
                }
            }
        })
    }
}

pub(crate) fn is_multipart(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case("multipart/form-data"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_multipart_content_types() {
        assert!(is_multipart("multipart/form-data; boundary=abc"));
        assert!(is_multipart("Multipart/Form-Data;boundary=abc"));
        assert!(!is_multipart("multipart/mixed; boundary=abc"));
        assert!(!is_multipart("application/json"));
        assert!(!is_multipart(""));
    }
}
