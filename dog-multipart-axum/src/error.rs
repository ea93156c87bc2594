use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dog_multipart::{ErrorKind, MultipartError};
use serde_json::json;

/// HTTP classes used for upload failures, Feathers-style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    BadRequest,         // 400
    NotAcceptable,      // 406
    PayloadTooLarge,    // 413
    GeneralError,       // 500
}

impl HttpErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            HttpErrorKind::BadRequest => 400,
            HttpErrorKind::NotAcceptable => 406,
            HttpErrorKind::PayloadTooLarge => 413,
            HttpErrorKind::GeneralError => 500,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HttpErrorKind::BadRequest => "BadRequest",
            HttpErrorKind::NotAcceptable => "NotAcceptable",
            HttpErrorKind::PayloadTooLarge => "PayloadTooLarge",
            HttpErrorKind::GeneralError => "GeneralError",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            HttpErrorKind::BadRequest => "bad-request",
            HttpErrorKind::NotAcceptable => "not-acceptable",
            HttpErrorKind::PayloadTooLarge => "payload-too-large",
            HttpErrorKind::GeneralError => "general-error",
        }
    }

    /// Class of a core error
    pub fn of(err: &MultipartError) -> Self {
        match err.kind() {
            ErrorKind::LimitExceeded | ErrorKind::FieldCountExceeded => HttpErrorKind::PayloadTooLarge,
            ErrorKind::InvalidMultipart => HttpErrorKind::NotAcceptable,
            ErrorKind::UnexpectedField
            | ErrorKind::ProtoViolation
            | ErrorKind::FilterRejectedWithError => HttpErrorKind::BadRequest,
            _ => HttpErrorKind::GeneralError,
        }
    }
}

#[derive(Debug)]
pub struct UploadError(pub anyhow::Error);

impl From<anyhow::Error> for UploadError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<MultipartError> for UploadError {
    fn from(e: MultipartError) -> Self {
        Self(anyhow::Error::new(e))
    }
}

impl UploadError {
    pub fn not_multipart(content_type: &str) -> Self {
        MultipartError::invalid(format!("expected multipart/form-data, got '{content_type}'")).into()
    }

    pub fn kind(&self) -> HttpErrorKind {
        self.multipart()
            .map(HttpErrorKind::of)
            .unwrap_or(HttpErrorKind::GeneralError)
    }

    /// Core error anywhere in the chain
    pub fn multipart(&self) -> Option<&MultipartError> {
        self.0.chain().find_map(|e| e.downcast_ref::<MultipartError>())
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let Some(err) = self.multipart() else {
            let body = json!({
                "name": kind.name(),
                "message": self.0.to_string(),
                "code": kind.status_code(),
                "className": kind.class_name(),
            });
            return (status, Json(body)).into_response();
        };

        // storage and parser internals stay on the server
        let message = match err.kind() {
            ErrorKind::DirectoryCreationFailed | ErrorKind::WriteFailed => "Failed to store uploaded file".to_string(),
            _ if kind == HttpErrorKind::GeneralError => "Failed to process multipart body".to_string(),
            _ => err.to_string(),
        };

        let mut data = json!({ "kind": format!("{:?}", err.kind()) });
        match err {
            MultipartError::LimitExceeded { limit, max } => {
                data["limit"] = json!(limit.as_str());
                data["max"] = json!(max);
            }
            MultipartError::UnexpectedField { field }
            | MultipartError::ProtoViolation { field }
            | MultipartError::FieldCountExceeded { field, .. } => {
                data["field"] = json!(field);
            }
            _ => {}
        }

        let body = json!({
            "name": kind.name(),
            "message": message,
            "code": kind.status_code(),
            "className": kind.class_name(),
            "data": data,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dog_multipart::Limit;

    #[test]
    fn core_errors_map_to_http_classes() {
        let cases = [
            (MultipartError::limit(Limit::Files, 2), 413),
            (MultipartError::field_count_exceeded("a", 1, 2), 413),
            (MultipartError::invalid("nope"), 406),
            (MultipartError::unexpected_field("b"), 400),
            (MultipartError::filter("bad"), 400),
            (
                MultipartError::stream("a", std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone")),
                500,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(HttpErrorKind::of(&err).status_code(), code, "{err}");
        }
    }

    #[test]
    fn wrapped_errors_are_found_through_context() {
        let err = UploadError(anyhow::Error::new(MultipartError::unexpected_field("b")).context("while uploading"));
        assert_eq!(err.kind(), HttpErrorKind::BadRequest);

        let plain = UploadError(anyhow::anyhow!("boom"));
        assert_eq!(plain.kind(), HttpErrorKind::GeneralError);
    }
}
