use axum::body::Body;
use axum::http::Request;
use axum::routing::post;
use axum::{Extension, Json, Router};
use dog_multipart::{FilterDecision, Limits, MultipartOptions, MultipartPart, MultipartWrapper, UploadField};
use dog_multipart_axum::{FileSummary, MultipartUpload, RequestHead, UploadError, UploadLayer, UploadedFiles};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "dogmultipartboundary";

fn multipart_body(files: &[(&str, &str, &str, &str)]) -> String {
    let mut raw = String::new();
    for (field, name, content_type, content) in files {
        raw.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n{content}\r\n"
        ));
    }
    raw.push_str(&format!("--{BOUNDARY}--\r\n"));
    raw
}

fn upload_request(files: &[(&str, &str, &str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(files)))
        .unwrap()
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn list_files(Extension(files): Extension<UploadedFiles>) -> Json<Vec<FileSummary>> {
    let files = files.take_files();
    Json(files.iter().map(FileSummary::from).collect())
}

fn app(layer: UploadLayer) -> Router {
    Router::new().route("/upload", post(list_files).layer(layer))
}

#[tokio::test]
async fn files_layer_persists_and_exposes_results() {
    let dir = tempfile::tempdir().unwrap();
    let layer = UploadLayer::files("photos", None).with_options(MultipartOptions::new().with_dest(dir.path()));

    let res = app(layer)
        .oneshot(upload_request(&[
            ("photos", "a.png", "image/png", "aaaa"),
            ("photos", "b.png", "image/png", "bb"),
        ]))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 200);
    let body = json_body(res).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["originalName"], "a.png");
    assert_eq!(body[0]["sizeBytes"], 4);
    assert_eq!(body[1]["sizeBytes"], 2);
    let stored = body[1]["storedName"].as_str().unwrap();
    assert!(dir.path().join(stored).exists());
}

#[tokio::test]
async fn non_multipart_request_is_not_acceptable() {
    let res = app(UploadLayer::any())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 406);
    let body = json_body(res).await;
    assert_eq!(body["name"], "NotAcceptable");
    assert_eq!(body["className"], "not-acceptable");
    assert_eq!(body["code"], 406);
}

#[tokio::test]
async fn unexpected_field_is_a_bad_request() {
    let layer = UploadLayer::file_fields([UploadField::new("avatar", 1)]);

    let res = app(layer)
        .oneshot(upload_request(&[
            ("avatar", "me.png", "image/png", "me"),
            ("cover", "wide.png", "image/png", "wide"),
        ]))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 400);
    let body = json_body(res).await;
    assert_eq!(body["name"], "BadRequest");
    assert_eq!(body["data"]["kind"], "UnexpectedField");
    assert_eq!(body["data"]["field"], "cover");
}

#[tokio::test]
async fn file_limit_is_payload_too_large() {
    let layer = UploadLayer::files("photos", Some(1));

    let res = app(layer)
        .oneshot(upload_request(&[
            ("photos", "a.png", "image/png", "a"),
            ("photos", "b.png", "image/png", "b"),
        ]))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 413);
    let body = json_body(res).await;
    assert_eq!(body["className"], "payload-too-large");
    assert_eq!(body["data"], json!({"kind": "LimitExceeded", "limit": "files", "max": 1}));
}

#[tokio::test]
async fn request_filter_sees_the_request() {
    let layer = UploadLayer::any().with_request_filter(|request: &RequestHead, part: &MultipartPart| {
        let allowed = request.header("x-allow-type").unwrap_or("");
        FilterDecision::from(part.content_type == allowed)
    });

    let mut req = upload_request(&[
        ("doc", "a.png", "image/png", "png"),
        ("doc", "b.txt", "text/plain", "txt"),
    ]);
    req.headers_mut().insert("x-allow-type", "text/plain".parse().unwrap());

    let res = app(layer).oneshot(req).await.unwrap();

    assert_eq!(res.status().as_u16(), 200);
    let body = json_body(res).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["originalName"], "b.txt");
    assert_eq!(body[0]["storedName"], Value::Null);
}

#[tokio::test]
async fn shared_wrapper_limits_apply_under_local_options() {
    let shared = MultipartWrapper::new(MultipartOptions::new().with_limits(Limits::new().with_file_size(3)));
    let layer = UploadLayer::any()
        .with_wrapper(shared)
        .with_options(MultipartOptions::new().allow_mime_type("image/png"));

    let res = app(layer)
        .oneshot(upload_request(&[("doc", "a.png", "image/png", "too big")]))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 413);
}

async fn extract_and_count(upload: MultipartUpload) -> Result<Json<Value>, UploadError> {
    let map = upload
        .file_fields(&[UploadField::new("avatar", 1), UploadField::unlimited("gallery")])
        .await?;
    let counts: Vec<(String, usize)> = map
        .map(|map| map.iter().map(|(name, files)| (name.to_string(), files.len())).collect())
        .unwrap_or_default();
    Ok(Json(json!(counts)))
}

#[tokio::test]
async fn extractor_runs_operations_in_handlers() {
    let app = Router::new()
        .route("/upload", post(extract_and_count))
        .with_state(MultipartWrapper::default());

    let res = app
        .oneshot(upload_request(&[
            ("gallery", "1.png", "image/png", "1"),
            ("avatar", "me.png", "image/png", "me"),
            ("gallery", "2.png", "image/png", "2"),
        ]))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(json_body(res).await, json!([["gallery", 2], ["avatar", 1]]));
}

#[tokio::test]
async fn extractor_rejects_non_multipart() {
    let app = Router::new()
        .route("/upload", post(extract_and_count))
        .with_state(MultipartWrapper::default());

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header("content-type", "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 406);
}
