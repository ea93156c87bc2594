use std::sync::Arc;

use axum::http::{request::Parts, HeaderMap, Method, Uri};
use dog_multipart::{FileFilter, FilterDecision, MultipartOptions, MultipartPart};

/// Request metadata visible to a [`RequestFileFilter`]
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// File filter that also sees the request the part belongs to
pub trait RequestFileFilter: Send + Sync {
    fn filter(&self, request: &RequestHead, part: &MultipartPart) -> FilterDecision;
}

impl<F> RequestFileFilter for F
where
    F: Fn(&RequestHead, &MultipartPart) -> FilterDecision + Send + Sync,
{
    fn filter(&self, request: &RequestHead, part: &MultipartPart) -> FilterDecision {
        self(request, part)
    }
}

/// A [`RequestFileFilter`] bound to one request.
struct BoundFilter {
    head: Arc<RequestHead>,
    filter: Arc<dyn RequestFileFilter>,
}

impl FileFilter for BoundFilter {
    fn filter(&self, part: &MultipartPart) -> FilterDecision {
        self.filter.filter(&self.head, part)
    }
}

/// Local options installing `filter` for the request described by `head`.
pub(crate) fn bind(head: Arc<RequestHead>, filter: Arc<dyn RequestFileFilter>) -> MultipartOptions {
    MultipartOptions::new().with_file_filter(BoundFilter { head, filter })
}
