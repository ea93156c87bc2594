//! # Filter stage
//!
//! Decides per part whether it is kept. A [`FileFilter`] answers with a
//! [`FilterDecision`] synchronously, so a decision can never arrive after
//! the operation already finished.
//!
//! ```rust
//! use dog_multipart::{FilterDecision, MultipartOptions, MultipartPart};
//!
//! let options = MultipartOptions::new().with_file_filter(|part: &MultipartPart| {
//!     if part.file_name.ends_with(".exe") {
//!         FilterDecision::error("executables are not accepted")
//!     } else if part.content_type.starts_with("image/") {
//!         FilterDecision::Accept
//!     } else {
//!         FilterDecision::Reject
//!     }
//! });
//! # let _ = options;
//! ```

use std::sync::Arc;

use crate::{BoxError, MultipartOptions, MultipartPart};

/// Outcome of filtering one part
#[derive(Debug)]
pub enum FilterDecision {
    /// Keep the part
    Accept,
    /// Skip the part; its stream gets drained
    Reject,
    /// Abort the whole operation
    Error(BoxError),
}

impl FilterDecision {
    pub fn error<E: Into<BoxError>>(error: E) -> Self {
        Self::Error(error.into())
    }

    /// Bridge for filters written as `Result<accepted, error>`.
    pub fn from_result<E: Into<BoxError>>(result: Result<bool, E>) -> Self {
        match result {
            Ok(true) => Self::Accept,
            Ok(false) => Self::Reject,
            Err(e) => Self::Error(e.into()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl From<bool> for FilterDecision {
    fn from(accepted: bool) -> Self {
        if accepted {
            Self::Accept
        } else {
            Self::Reject
        }
    }
}

/// User supplied accept/reject predicate
pub trait FileFilter: Send + Sync {
    fn filter(&self, part: &MultipartPart) -> FilterDecision;
}

impl<F> FileFilter for F
where
    F: Fn(&MultipartPart) -> FilterDecision + Send + Sync,
{
    fn filter(&self, part: &MultipartPart) -> FilterDecision {
        self(part)
    }
}

/// Mime allow-list followed by the user filter. With neither configured
/// every part is accepted.
#[derive(Clone, Default)]
pub struct FilterStage {
    allowed_mime_types: Vec<String>,
    filter: Option<Arc<dyn FileFilter>>,
}

impl FilterStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: &MultipartOptions) -> Self {
        Self {
            allowed_mime_types: options.allowed_mime_types.clone(),
            filter: options.file_filter.clone(),
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn FileFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn decide(&self, part: &MultipartPart) -> FilterDecision {
        if !mime_allowed(&self.allowed_mime_types, &part.content_type) {
            return FilterDecision::Reject;
        }
        match &self.filter {
            Some(filter) => filter.filter(part),
            None => FilterDecision::Accept,
        }
    }
}

pub(crate) fn mime_allowed(allowed: &[String], content_type: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|mime| mime.eq_ignore_ascii_case(content_type))
}

impl std::fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage")
            .field("allowed_mime_types", &self.allowed_mime_types)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PartBody;

    fn part(content_type: &str) -> MultipartPart {
        MultipartPart::new("file", "a.bin", content_type, PartBody::empty())
    }

    #[test]
    fn identity_without_filter() {
        let stage = FilterStage::new();
        assert!(stage.decide(&part("application/octet-stream")).is_accepted());
    }

    #[test]
    fn allow_list_runs_before_user_filter() {
        let options = MultipartOptions::new()
            .allow_mime_type("image/png")
            .with_file_filter(|_: &MultipartPart| FilterDecision::error("should not run"));
        let stage = FilterStage::from_options(&options);

        assert!(matches!(stage.decide(&part("image/gif")), FilterDecision::Reject));
        assert!(matches!(stage.decide(&part("image/png")), FilterDecision::Error(_)));
    }

    #[test]
    fn callback_results_map_to_decisions() {
        assert!(FilterDecision::from_result::<BoxError>(Ok(true)).is_accepted());
        assert!(matches!(FilterDecision::from_result::<BoxError>(Ok(false)), FilterDecision::Reject));
        assert!(matches!(FilterDecision::from_result(Err("nope")), FilterDecision::Error(_)));
    }
}
